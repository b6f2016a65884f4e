// src/invoice.rs

//! Invoice records as returned by the model, flattened into one row per line item.
//!
//! Field values stay as raw JSON: nothing is coerced, and a missing key reads as `null`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bucket used for invoices without a category.
pub const UNKNOWN_CATEGORY: &str = "None";

/// Output columns, in table order.
pub const COLUMNS: [&str; 11] = [
    "Invoice_Number",
    "Invoice_Date",
    "Vendor_Name",
    "Currency",
    "Subtotal",
    "Total_Amount",
    "Category",
    "Item_Name",
    "Quantity",
    "Unit_Price",
    "Line_Total",
];

fn field(obj: &Map<String, Value>, key: &str) -> Value {
    obj.get(key).cloned().unwrap_or(Value::Null)
}

/// Invoice-level fields, copied onto every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoiceHeader {
    #[serde(rename = "Invoice_Number")]
    pub invoice_number: Value,
    #[serde(rename = "Invoice_Date")]
    pub invoice_date: Value,
    #[serde(rename = "Vendor_Name")]
    pub vendor_name: Value,
    #[serde(rename = "Currency")]
    pub currency: Value,
    #[serde(rename = "Subtotal")]
    pub subtotal: Value,
    #[serde(rename = "Total_Amount")]
    pub total_amount: Value,
    #[serde(rename = "Category")]
    pub category: Value,
}

impl InvoiceHeader {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            invoice_number: field(obj, "Invoice_Number"),
            invoice_date: field(obj, "Invoice_Date"),
            vendor_name: field(obj, "Vendor_Name"),
            currency: field(obj, "Currency"),
            subtotal: field(obj, "Subtotal"),
            total_amount: field(obj, "Total_Amount"),
            category: field(obj, "Category"),
        }
    }
}

/// A single purchased entry. No identity beyond its position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineItem {
    #[serde(rename = "Item_Name")]
    pub item_name: Value,
    #[serde(rename = "Quantity")]
    pub quantity: Value,
    #[serde(rename = "Unit_Price")]
    pub unit_price: Value,
    #[serde(rename = "Line_Total")]
    pub line_total: Value,
}

impl LineItem {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            item_name: field(obj, "Item_Name"),
            quantity: field(obj, "Quantity"),
            unit_price: field(obj, "Unit_Price"),
            line_total: field(obj, "Line_Total"),
        }
    }

    fn from_value(value: &Value) -> Self {
        value.as_object().map(Self::from_object).unwrap_or_default()
    }
}

/// One parsed invoice: header plus at least one line item.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub header: InvoiceHeader,
    pub items: Vec<LineItem>,
}

impl InvoiceRecord {
    /// Build a record from a decoded model object.
    ///
    /// Uses `Items` when it is a non-empty list; otherwise synthesizes a single
    /// item from the header-level item fields, even if they are all null.
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let items = match obj.get("Items").and_then(Value::as_array) {
            Some(list) if !list.is_empty() => list.iter().map(LineItem::from_value).collect(),
            _ => vec![LineItem::from_object(obj)],
        };

        Self {
            header: InvoiceHeader::from_object(obj),
            items,
        }
    }

    /// Grouping key for spend aggregation. Exact, case-sensitive.
    pub fn category_label(&self) -> String {
        category_label(&self.header.category)
    }

    /// Total_Amount as a number; non-numeric values count as zero.
    pub fn total_amount(&self) -> f64 {
        self.header.total_amount.as_f64().unwrap_or(0.0)
    }

    pub fn flatten(&self) -> Vec<InvoiceRow> {
        self.items
            .iter()
            .map(|item| InvoiceRow {
                header: self.header.clone(),
                item: item.clone(),
            })
            .collect()
    }
}

fn category_label(value: &Value) -> String {
    match value {
        Value::Null => UNKNOWN_CATEGORY.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flattened output: header fields duplicated across every item of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRow {
    #[serde(flatten)]
    pub header: InvoiceHeader,
    #[serde(flatten)]
    pub item: LineItem,
}

impl InvoiceRow {
    /// Cell values in [`COLUMNS`] order.
    pub fn cells(&self) -> [&Value; 11] {
        [
            &self.header.invoice_number,
            &self.header.invoice_date,
            &self.header.vendor_name,
            &self.header.currency,
            &self.header.subtotal,
            &self.header.total_amount,
            &self.header.category,
            &self.item.item_name,
            &self.item.quantity,
            &self.item.unit_price,
            &self.item.line_total,
        ]
    }

    pub fn category_label(&self) -> String {
        category_label(&self.header.category)
    }
}

/// Plain-text rendering of a cell: null is empty, strings are unquoted.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How invoice totals feed the category sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Each invoice's Total_Amount counted once.
    #[default]
    PerInvoice,
    /// Total_Amount counted once per flattened row, so multi-item invoices
    /// contribute their total several times.
    PerRow,
}

/// Summed Total_Amount per category, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CategoryTotals(IndexMap<String, f64>);

impl CategoryTotals {
    fn add(&mut self, category: String, amount: f64) {
        *self.0.entry(category).or_insert(0.0) += amount;
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.0.get(category).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn grand_total(&self) -> f64 {
        self.0.values().sum()
    }
}

/// Ordered rows from one or more invoices, in processing order then item order.
#[derive(Debug, Clone, Default)]
pub struct InvoiceTable {
    invoices: Vec<InvoiceRecord>,
    rows: Vec<InvoiceRow>,
}

impl InvoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: InvoiceRecord) {
        self.rows.extend(record.flatten());
        self.invoices.push(record);
    }

    pub fn rows(&self) -> &[InvoiceRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }

    pub fn category_totals(&self, mode: AggregationMode) -> CategoryTotals {
        let mut totals = CategoryTotals::default();
        match mode {
            AggregationMode::PerInvoice => {
                for invoice in &self.invoices {
                    totals.add(invoice.category_label(), invoice.total_amount());
                }
            }
            AggregationMode::PerRow => {
                for row in &self.rows {
                    let amount = row.header.total_amount.as_f64().unwrap_or(0.0);
                    totals.add(row.category_label(), amount);
                }
            }
        }
        totals
    }
}
