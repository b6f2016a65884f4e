// src/dashboard.rs

//! HTML and plain-text rendering of a [`BatchReport`].

use crate::chart::{self, format_percent};
use crate::export;
use crate::invoice::{COLUMNS, cell_text};
use crate::pipeline::{ACCEPTED_EXTENSIONS, BatchReport, FileOutcome, NoticeLevel, TableView};
use std::fmt::Write;
use tracing::warn;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 1100px; padding: 0 1rem; color: #222; }
h1 { margin-bottom: 0.25rem; }
form { margin: 1rem 0 2rem; padding: 1rem; border: 1px dashed #bbb; border-radius: 8px; }
button { margin-top: 0.75rem; padding: 0.4rem 1rem; }
.notice { padding: 0.5rem 0.75rem; margin: 0.25rem 0; border-radius: 6px; }
.notice.success { background: #e6f4ea; color: #1e4620; }
.notice.warning { background: #fff4e5; color: #663c00; }
.notice.error { background: #fdecea; color: #611a15; }
table { border-collapse: collapse; width: 100%; font-size: 0.9rem; margin: 0.5rem 0; }
th, td { border: 1px solid #ddd; padding: 0.3rem 0.5rem; text-align: left; }
th { background: #f5f5f5; }
td.null { color: #999; }
section.file { margin: 2rem 0; }
"#;

/// Escape text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Personal Finance Dashboard</title>\n<style>{STYLE}</style>\n</head>\n\
         <body>\n<h1>Personal Finance Dashboard</h1>\n{body}\n</body>\n</html>\n"
    )
}

fn upload_form() -> String {
    let accept = ACCEPTED_EXTENSIONS
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "<form action=\"/process\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <label for=\"files\">Upload Invoices</label><br>\n\
         <input id=\"files\" type=\"file\" name=\"file\" accept=\"{accept}\" multiple><br>\n\
         <button type=\"submit\">Process Invoices</button>\n</form>"
    )
}

/// Landing page: just the upload form.
pub fn render_index() -> String {
    page(&upload_form())
}

fn notice_class(level: NoticeLevel) -> &'static str {
    match level {
        NoticeLevel::Success => "success",
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    }
}

fn render_table(view: &TableView, out: &mut String) {
    out.push_str("<table>\n<thead><tr>");
    for column in COLUMNS {
        let _ = write!(out, "<th>{column}</th>");
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in &view.rows {
        out.push_str("<tr>");
        for cell in row.cells() {
            if cell.is_null() {
                out.push_str("<td class=\"null\">None</td>");
            } else {
                let _ = write!(out, "<td>{}</td>", escape_html(&cell_text(cell)));
            }
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
}

fn render_view(view: &TableView, csv_name: &str, out: &mut String) {
    render_table(view, out);

    match export::rows_to_csv(&view.rows) {
        Ok(csv) => {
            let _ = write!(
                out,
                "<p><a download=\"{}\" href=\"data:text/csv;charset=utf-8,{}\">Download CSV</a></p>\n",
                escape_html(csv_name),
                urlencoding::encode(&csv)
            );
        }
        Err(e) => warn!(error = %e, "CSV export failed, omitting download link"),
    }

    out.push_str("<h3>Categories</h3>\n");
    if view.slices.is_empty() {
        out.push_str("<p class=\"notice warning\">No positive totals to chart.</p>\n");
    } else {
        out.push_str(&chart::render_svg(&view.slices));
        out.push('\n');
    }
}

fn csv_name_for(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("invoice");
    format!("{stem}.csv")
}

/// Full results page for a processed batch.
pub fn render_report(report: &BatchReport) -> String {
    let mut body = upload_form();
    body.push('\n');

    for notice in &report.notices {
        let _ = writeln!(
            body,
            "<div class=\"notice {}\">{}</div>",
            notice_class(notice.level),
            escape_html(&notice.message)
        );
    }

    for outcome in &report.files {
        if let FileOutcome::Processed { filename, view } = outcome {
            let _ = writeln!(
                body,
                "<section class=\"file\">\n<h2>{}</h2>",
                escape_html(filename)
            );
            render_view(view, &csv_name_for(filename), &mut body);
            body.push_str("</section>\n");
        }
    }

    if report.processed_count() > 1 {
        if let Some(summary) = &report.summary {
            body.push_str("<section class=\"file\">\n<h2>All invoices</h2>\n");
            render_view(summary, "invoices.csv", &mut body);
            body.push_str("</section>\n");
        }
    }

    page(&body)
}

fn text_line<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize], out: &mut String) {
    let padded: Vec<String> = values
        .zip(widths.iter().copied())
        .map(|(v, w)| format!("{v:<w$}"))
        .collect();
    let _ = writeln!(out, "{}", padded.join("  ").trim_end());
}

fn text_table(view: &TableView, out: &mut String) {
    let cells: Vec<Vec<String>> = view
        .rows
        .iter()
        .map(|row| row.cells().iter().map(|c| cell_text(c)).collect())
        .collect();

    let widths: Vec<usize> = COLUMNS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    text_line(COLUMNS.iter().copied(), &widths, out);
    for row in &cells {
        text_line(row.iter().map(String::as_str), &widths, out);
    }

    if view.category_totals.is_empty() {
        out.push_str("Categories: none\n");
        return;
    }
    let _ = writeln!(out, "Categories (total {}):", view.category_totals.grand_total());
    for (category, total) in view.category_totals.iter() {
        let share = view
            .slices
            .iter()
            .find(|s| s.label == category)
            .map(|s| format_percent(s.percent))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "  {category}: {total} ({share})");
    }
}

/// Plain-text rendering for terminal output.
pub fn render_text(report: &BatchReport) -> String {
    let mut out = String::new();
    for notice in &report.notices {
        let tag = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        let _ = writeln!(out, "[{tag}] {}", notice.message);
    }

    for outcome in &report.files {
        if let FileOutcome::Processed { filename, view } = outcome {
            let _ = writeln!(out, "\n== {filename} ==");
            text_table(view, &mut out);
        }
    }
    out
}
