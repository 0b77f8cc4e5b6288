//! Core gym model, record normalization and knowledge-context building for Gym Scout.
//!
//! Everything in this crate is pure: records come in already fetched, views and grounding text
//! come out. Network access lives in `gymscout-storage` and `gymscout-adapters`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

pub const CRATE_NAME: &str = "gymscout-core";

/// Candidate columns for the gym's display name, in priority order.
pub const NAME_FIELDS: [&str; 2] = ["Gym Name", "Name"];
pub const LOCATION_FIELDS: [&str; 2] = ["Location", "City"];
pub const DESCRIPTION_FIELDS: [&str; 2] = ["Description", "Notes"];
pub const PRICE_FIELDS: [&str; 2] = ["Prices", "Price"];

/// The six rating columns averaged into [`GymView::rating`].
pub const RATING_FIELDS: [&str; 6] = [
    "Overall Rating",
    "Cleanliness Rating",
    "Trainer Rating",
    "Facilities Rating",
    "Value Rating",
    "Atmosphere Rating",
];

pub const DEFAULT_RATING: f64 = 4.8;
pub const PRICE_PLACEHOLDER: &str = "Contact for pricing";
pub const REDACTED: &str = "Contact for details.";

const AMENITY_FIELDS: [(&str, &str); 3] = [
    ("Air Conditioning", "Air conditioning"),
    ("WiFi", "WiFi"),
    ("Private Bathroom", "Private bathroom"),
];

/// Keys owned by [`GymView`]; raw fields with these names are not spread onto the view.
const VIEW_KEYS: [&str; 8] = [
    "id",
    "name",
    "location",
    "description",
    "accommodation",
    "training",
    "rating",
    "price",
];

/// Airtable row ids look like `recXXXXXXXXXXXXXX`.
///
/// Linked-record columns surface these ids instead of readable values, so anything matching
/// must never reach a user or the assistant prompt. The prefix is specific to Airtable.
pub fn looks_like_record_id(value: &str) -> bool {
    value.starts_with("rec")
}

/// A single JSON scalar from a spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl Scalar {
    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Bool(b) => Some(Self::Bool(*b)),
            JsonValue::Number(n) => Some(Self::Number(n.clone())),
            JsonValue::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    fn into_json(self) -> JsonValue {
        match self {
            Self::Bool(b) => JsonValue::Bool(b),
            Self::Number(n) => JsonValue::Number(n),
            Self::Text(s) => JsonValue::String(s),
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            Self::Bool(true) => "Yes".to_string(),
            Self::Bool(false) => "No".to_string(),
            Self::Number(n) => format_number(n),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn truthiness(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(n) => n.as_f64().map(|v| v != 0.0),
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" | "available" | "on-site" | "onsite" | "included" => {
                    Some(true)
                }
                "no" | "n" | "false" | "0" | "none" | "not available" | "unavailable" => {
                    Some(false)
                }
                _ => None,
            },
        }
    }
}

/// Loosely typed spreadsheet cell value.
///
/// Arrays holding only scalars are [`FieldValue::List`]; an array with any object, nested array or
/// null element is a [`FieldValue::NestedList`] (attachments, lookup rollups, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum FieldValue {
    #[default]
    Absent,
    Scalar(Scalar),
    List(Vec<Scalar>),
    NestedList(Vec<JsonValue>),
    Object(JsonMap<String, JsonValue>),
}

static ABSENT: FieldValue = FieldValue::Absent;

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(value.into()))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Numeric value, only when the cell actually holds a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Scalar(s) => s.as_f64(),
            _ => None,
        }
    }

    /// Readable text for scalar cells and scalar lists.
    pub fn plain_text(&self) -> Option<String> {
        match self {
            Self::Scalar(s) => Some(s.display_text()),
            Self::List(items) => Some(join_display(items, ", ")),
            Self::Absent | Self::NestedList(_) | Self::Object(_) => None,
        }
    }

    /// Multi-select style tags. A single text cell counts as one tag.
    pub fn tags(&self) -> Vec<String> {
        match self {
            Self::Scalar(Scalar::Text(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            Self::List(items) => items
                .iter()
                .map(Scalar::display_text)
                .filter(|t| !t.trim().is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Boolean-like reading of checkbox, yes/no text or single-select cells.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Self::Scalar(s) => s.truthiness(),
            Self::List(items) => items.first().and_then(Scalar::truthiness),
            Self::Absent | Self::NestedList(_) | Self::Object(_) => None,
        }
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Absent,
            JsonValue::Array(items) => {
                match items.iter().map(Scalar::from_json).collect::<Option<Vec<_>>>() {
                    Some(scalars) => Self::List(scalars),
                    None => Self::NestedList(items),
                }
            }
            JsonValue::Object(map) => Self::Object(map),
            other => Scalar::from_json(&other).map(Self::Scalar).unwrap_or_default(),
        }
    }
}

impl From<FieldValue> for JsonValue {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Absent => JsonValue::Null,
            FieldValue::Scalar(s) => s.into_json(),
            FieldValue::List(items) => {
                JsonValue::Array(items.into_iter().map(Scalar::into_json).collect())
            }
            FieldValue::NestedList(items) => JsonValue::Array(items),
            FieldValue::Object(map) => JsonValue::Object(map),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

/// One row of an external table, as returned by the Airtable REST API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(default, rename = "createdTime", skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builds a record from a JSON object of fields. Non-object input yields no fields.
    pub fn from_json_fields(id: impl Into<String>, fields: JsonValue) -> Self {
        let mut record = Self::new(id);
        if let JsonValue::Object(map) = fields {
            for (name, value) in map {
                record.fields.insert(name, FieldValue::from(value));
            }
        }
        record
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&ABSENT)
    }

    /// First of `names` that is present, with the column it came from.
    pub fn first_present<'a>(&'a self, names: &[&'a str]) -> Option<(&'a str, &'a FieldValue)> {
        names
            .iter()
            .map(|name| (*name, self.field(name)))
            .find(|(_, value)| !value.is_absent())
    }

    /// First of `names` holding non-empty text, with the column it came from.
    fn first_text<'a>(&'a self, names: &[&'a str]) -> Option<(&'a str, String)> {
        names.iter().find_map(|name| {
            self.field(name)
                .plain_text()
                .filter(|t| !t.trim().is_empty())
                .map(|t| (*name, t))
        })
    }

    pub fn gym_name(&self) -> Option<String> {
        self.first_text(&NAME_FIELDS).map(|(_, name)| name)
    }
}

/// A row of the secondary price table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub id: String,
    pub label: Option<String>,
    pub cost: Option<Scalar>,
}

impl PriceRow {
    pub fn from_record(record: &RawRecord) -> Self {
        let label = record
            .first_text(&["Name", "Item", "Package"])
            .map(|(_, label)| label);
        let cost = ["Price", "Cost"]
            .iter()
            .find_map(|name| match record.field(name) {
                FieldValue::Scalar(s) => Some(s.clone()),
                _ => None,
            });
        Self {
            id: record.id.clone(),
            label,
            cost,
        }
    }

    pub fn display(&self) -> Option<String> {
        let cost = self.cost.as_ref().map(|c| match c {
            Scalar::Number(n) => format_baht(n),
            other => other.display_text(),
        });
        match (&self.label, cost) {
            (Some(label), Some(cost)) => Some(format!("{label}: {cost}")),
            (Some(label), None) => Some(label.clone()),
            (None, Some(cost)) => Some(cost),
            (None, None) => None,
        }
    }
}

/// Record id → display string for the price table, built once per request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceLookup {
    entries: HashMap<String, String>,
}

impl PriceLookup {
    pub fn from_records(records: &[RawRecord]) -> Self {
        let entries = records
            .iter()
            .map(PriceRow::from_record)
            .filter_map(|row| row.display().map(|text| (row.id, text)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }
}

/// Display-ready gym, serialized as the raw record's fields plus the derived keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GymView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub description: String,
    pub accommodation: String,
    pub training: String,
    pub rating: f64,
    pub price: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, FieldValue>,
}

impl GymView {
    pub fn from_record(record: &RawRecord, prices: &PriceLookup) -> Self {
        let name = record.gym_name();
        let location = record.first_text(&LOCATION_FIELDS).map(|(_, l)| l);
        let description = describe(record, name.as_deref());
        let price = resolve_price(record, prices);

        let mut extra: BTreeMap<String, FieldValue> = record
            .fields
            .iter()
            .filter(|(key, value)| !value.is_absent() && !VIEW_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for key in PRICE_FIELDS {
            if let Some(slot) = extra.get_mut(key) {
                *slot = match &price {
                    Some(resolved) => FieldValue::List(
                        resolved.iter().cloned().map(Scalar::Text).collect(),
                    ),
                    None => FieldValue::Absent,
                };
            }
        }

        Self {
            id: record.id.clone(),
            name,
            location,
            description,
            accommodation: accommodation_text(record),
            training: training_text(record),
            rating: average_rating(record),
            price,
            extra,
        }
    }
}

/// Raw description, or a synthesized one when neither `Description` nor `Notes` exists.
///
/// An empty-string description counts as present and is returned as-is.
pub fn describe(record: &RawRecord, name: Option<&str>) -> String {
    match record.first_present(&DESCRIPTION_FIELDS) {
        Some((_, value)) => value.plain_text().unwrap_or_default(),
        None => synthesize_description(record, name),
    }
}

fn synthesize_description(record: &RawRecord, name: Option<&str>) -> String {
    let atmosphere = join_or(record.field("Atmosphere").tags(), "Authentic");
    let levels = join_or(record.field("Skill Level").tags(), "all levels");
    let name = name.unwrap_or("this gym");

    let mut text = format!("{atmosphere} Muay Thai gym {name} welcoming {levels} fighters.");
    if let Some(owner) = record.field("Owner").plain_text().filter(|o| !o.is_empty()) {
        text.push_str(&format!(" Run by {owner}."));
    }
    if let Some(exp) = record
        .field("Trainer Experience")
        .plain_text()
        .filter(|e| !e.is_empty())
    {
        text.push_str(&format!(" Trainers bring {exp} of experience."));
    }
    text
}

pub fn accommodation_text(record: &RawRecord) -> String {
    match record.field("Accommodation").truthiness() {
        Some(true) => {
            let amenities = AMENITY_FIELDS
                .iter()
                .filter(|(field, _)| record.field(field).truthiness() == Some(true))
                .map(|(_, label)| *label)
                .collect::<Vec<_>>();
            if amenities.is_empty() {
                "On-site accommodation available".to_string()
            } else {
                format!("On-site accommodation available ({})", amenities.join(", "))
            }
        }
        Some(false) => "No on-site accommodation".to_string(),
        None => "Contact gym for accommodation details".to_string(),
    }
}

pub fn training_text(record: &RawRecord) -> String {
    if let Some(schedule) = record
        .field("Training Schedule")
        .plain_text()
        .filter(|s| !s.trim().is_empty())
    {
        return schedule;
    }
    let levels = record.field("Skill Level").tags();
    if levels.is_empty() {
        "Contact gym for training details".to_string()
    } else {
        format!("Classes for {}", levels.join(", "))
    }
}

/// Mean of the numeric rating columns, one decimal, [`DEFAULT_RATING`] when none are numeric.
pub fn average_rating(record: &RawRecord) -> f64 {
    let values = RATING_FIELDS
        .iter()
        .filter_map(|field| record.field(field).as_number())
        .collect::<Vec<_>>();
    if values.is_empty() {
        return DEFAULT_RATING;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (mean * 10.0).round() / 10.0
}

/// Resolves the gym's price column into display strings.
///
/// Linked ids missing from `prices` are dropped. `None` only when the column is absent.
pub fn resolve_price(record: &RawRecord, prices: &PriceLookup) -> Option<Vec<String>> {
    let (_, value) = record.first_present(&PRICE_FIELDS)?;
    match value {
        FieldValue::Absent => None,
        FieldValue::List(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Scalar::Text(id) => prices.get(id).map(str::to_string),
                    _ => None,
                })
                .collect(),
        ),
        FieldValue::Scalar(Scalar::Text(s)) if looks_like_record_id(s) => {
            Some(vec![PRICE_PLACEHOLDER.to_string()])
        }
        FieldValue::Scalar(s) => Some(vec![s.display_text()]),
        FieldValue::NestedList(_) | FieldValue::Object(_) => {
            Some(vec![PRICE_PLACEHOLDER.to_string()])
        }
    }
}

pub fn normalize_gyms(records: &[RawRecord], prices: &PriceLookup) -> Vec<GymView> {
    records
        .iter()
        .map(|record| GymView::from_record(record, prices))
        .collect()
}

/// Grounding text handed to the assistant, plus the names it is allowed to recommend.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct KnowledgeContext {
    pub text: String,
    pub gym_names: Vec<String>,
}

impl KnowledgeContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub fn build_knowledge(records: &[RawRecord], prices: &PriceLookup) -> KnowledgeContext {
    let mut lines = Vec::with_capacity(records.len());
    let mut gym_names = Vec::new();

    for record in records {
        let named = record.first_text(&NAME_FIELDS);
        let name_key = named.as_ref().map(|(key, _)| *key);
        let name = named
            .as_ref()
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| "Unknown Gym".to_string());
        if let Some((_, name)) = &named {
            gym_names.push(name.clone());
        }

        let mut line = format!("Gym: {name}");
        for (key, value) in &record.fields {
            if Some(key.as_str()) == name_key {
                continue;
            }
            let rendered = if PRICE_FIELDS.contains(&key.as_str()) {
                knowledge_price(value, prices)
            } else {
                knowledge_value(value)
            };
            if let Some(rendered) = rendered {
                line.push_str(&format!(" | {key}: {rendered}"));
            }
        }
        lines.push(line);
    }

    KnowledgeContext {
        text: lines.join("\n"),
        gym_names,
    }
}

/// Linked price ids render as their price rows; anything unresolved follows the redaction rule.
fn knowledge_price(value: &FieldValue, prices: &PriceLookup) -> Option<String> {
    if let FieldValue::List(items) = value {
        let resolved: Vec<&str> = items
            .iter()
            .filter_map(|item| match item {
                Scalar::Text(id) => prices.get(id),
                _ => None,
            })
            .collect();
        if !resolved.is_empty() {
            return Some(resolved.join("; "));
        }
    }
    knowledge_value(value)
}

fn knowledge_value(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Absent => None,
        FieldValue::Scalar(Scalar::Text(s)) if looks_like_record_id(s) => Some(REDACTED.to_string()),
        FieldValue::Scalar(s) => Some(s.display_text()),
        FieldValue::List(items)
            if items
                .iter()
                .any(|item| matches!(item, Scalar::Text(t) if looks_like_record_id(t))) =>
        {
            Some(REDACTED.to_string())
        }
        FieldValue::List(items) => Some(join_display(items, ", ")),
        FieldValue::NestedList(_) | FieldValue::Object(_) => Some(REDACTED.to_string()),
    }
}

/// Normalizes both outputs of the grounding pipeline in one pass over the fetched tables.
pub fn build_grounding(
    gyms: &[RawRecord],
    price_records: &[RawRecord],
) -> (Vec<GymView>, KnowledgeContext) {
    let prices = PriceLookup::from_records(price_records);
    (normalize_gyms(gyms, &prices), build_knowledge(gyms, &prices))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Red,
    Yellow,
    Green,
    Gray,
}

#[derive(Debug, Clone, Copy)]
struct ScheduleWindow {
    start_hour: u32,
    end_hour: u32,
    status: &'static str,
    color: StatusColor,
}

pub const CLOSED_TODAY: &str = "Closed Today";
pub const CLOSED_NOW: &str = "Closed Now";
const BANGKOK_UTC_OFFSET_HOURS: i64 = 7;

/// Monday to Saturday schedule, hours in Bangkok time, end exclusive.
const DAILY_SCHEDULE: [ScheduleWindow; 8] = [
    ScheduleWindow { start_hour: 0, end_hour: 6, status: CLOSED_NOW, color: StatusColor::Gray },
    ScheduleWindow { start_hour: 6, end_hour: 7, status: "Moderate", color: StatusColor::Yellow },
    ScheduleWindow { start_hour: 7, end_hour: 10, status: "Busy - Morning Session", color: StatusColor::Red },
    ScheduleWindow { start_hour: 10, end_hour: 12, status: "Moderate", color: StatusColor::Yellow },
    ScheduleWindow { start_hour: 12, end_hour: 15, status: "Low", color: StatusColor::Green },
    ScheduleWindow { start_hour: 15, end_hour: 18, status: "Busy - Afternoon Session", color: StatusColor::Red },
    ScheduleWindow { start_hour: 18, end_hour: 20, status: "Moderate", color: StatusColor::Yellow },
    ScheduleWindow { start_hour: 20, end_hour: 24, status: CLOSED_NOW, color: StatusColor::Gray },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub window: String,
    pub status: String,
    pub color: StatusColor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficReport {
    pub time: String,
    pub hour: u32,
    pub status: String,
    pub color: StatusColor,
    pub statuses: Vec<ScheduleEntry>,
}

/// Expected gym traffic at `now`, evaluated in Bangkok time. Closed all day on Sundays.
pub fn traffic_status(now: DateTime<Utc>) -> TrafficReport {
    let local = now.naive_utc() + Duration::hours(BANGKOK_UTC_OFFSET_HOURS);
    let hour = local.hour();

    let (status, color) = if local.weekday() == Weekday::Sun {
        (CLOSED_TODAY, StatusColor::Gray)
    } else {
        DAILY_SCHEDULE
            .iter()
            .find(|w| hour >= w.start_hour && hour < w.end_hour)
            .map(|w| (w.status, w.color))
            .unwrap_or(("Low", StatusColor::Green))
    };

    TrafficReport {
        time: format!("{:02}:{:02}", hour, local.minute()),
        hour,
        status: status.to_string(),
        color,
        statuses: DAILY_SCHEDULE
            .iter()
            .map(|w| ScheduleEntry {
                window: format!("{:02}:00-{:02}:00", w.start_hour, w.end_hour),
                status: w.status.to_string(),
                color: w.color,
            })
            .collect(),
    }
}

fn join_or(tags: Vec<String>, fallback: &str) -> String {
    if tags.is_empty() {
        fallback.to_string()
    } else {
        tags.join(", ")
    }
}

fn join_display(items: &[Scalar], sep: &str) -> String {
    items
        .iter()
        .map(Scalar::display_text)
        .collect::<Vec<_>>()
        .join(sep)
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn format_baht(n: &Number) -> String {
    let text = format_number(n);
    let (int_part, frac) = match text.split_once('.') {
        Some((int_part, frac)) => (int_part, Some(frac)),
        None => (text.as_str(), None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", int_part),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac {
        Some(frac) => format!("{sign}฿{grouped}.{frac}"),
        None => format!("{sign}฿{grouped}"),
    }
}
