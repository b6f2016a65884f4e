// src/chart.rs

//! Category pie chart: slice shares and an inline SVG rendering.

use crate::dashboard::escape_html;
use crate::invoice::CategoryTotals;
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt::Write;

/// Slice colours, cycled when there are more categories than entries.
const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieSlice {
    pub label: String,
    pub value: f64,
    /// Share of the chart, 0..=100.
    pub percent: f64,
}

/// One slice per category with a positive total.
///
/// Zero and negative totals cannot be drawn as a share and are left out;
/// when nothing positive remains the chart is empty.
pub fn pie_slices(totals: &CategoryTotals) -> Vec<PieSlice> {
    let positive: Vec<(&str, f64)> = totals
        .iter()
        .filter(|(_, v)| v.is_finite() && *v > 0.0)
        .collect();
    let sum: f64 = positive.iter().map(|(_, v)| v).sum();
    if sum <= 0.0 {
        return Vec::new();
    }

    positive
        .into_iter()
        .map(|(label, value)| PieSlice {
            label: label.to_string(),
            value,
            percent: value / sum * 100.0,
        })
        .collect()
}

/// Percentage label, one decimal place.
pub fn format_percent(percent: f64) -> String {
    format!("{percent:.1}%")
}

fn point(cx: f64, cy: f64, r: f64, angle: f64) -> (f64, f64) {
    (cx + r * angle.cos(), cy + r * angle.sin())
}

/// Render slices as a standalone SVG with a legend on the right.
pub fn render_svg(slices: &[PieSlice]) -> String {
    const RADIUS: f64 = 120.0;
    const CX: f64 = 140.0;
    const CY: f64 = 140.0;
    let legend_x = CX + RADIUS + 40.0;
    let height = (2.0 * CY).max(30.0 + 22.0 * slices.len() as f64);

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="560" height="{height:.0}" viewBox="0 0 560 {height:.0}" role="img" aria-label="Spend by category">"#
    );

    // start at twelve o'clock, go clockwise
    let mut angle = -PI / 2.0;
    for (i, slice) in slices.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let sweep = slice.percent / 100.0 * 2.0 * PI;
        let title = format!("{}: {}", escape_html(&slice.label), format_percent(slice.percent));

        if slices.len() == 1 {
            let _ = write!(
                svg,
                r#"<circle cx="{CX}" cy="{CY}" r="{RADIUS}" fill="{color}"><title>{title}</title></circle>"#
            );
        } else {
            let (x0, y0) = point(CX, CY, RADIUS, angle);
            let (x1, y1) = point(CX, CY, RADIUS, angle + sweep);
            let large_arc = u8::from(sweep > PI);
            let _ = write!(
                svg,
                r##"<path d="M {CX} {CY} L {x0:.3} {y0:.3} A {RADIUS} {RADIUS} 0 {large_arc} 1 {x1:.3} {y1:.3} Z" fill="{color}" stroke="#fff" stroke-width="1"><title>{title}</title></path>"##
            );
        }

        let (lx, ly) = point(CX, CY, RADIUS * 0.65, angle + sweep / 2.0);
        let _ = write!(
            svg,
            r##"<text x="{lx:.1}" y="{ly:.1}" text-anchor="middle" dominant-baseline="middle" font-size="12" fill="#fff">{}</text>"##,
            format_percent(slice.percent)
        );

        let row_y = 30.0 + 22.0 * i as f64;
        let _ = write!(
            svg,
            r#"<rect x="{legend_x}" y="{:.1}" width="14" height="14" fill="{color}"/><text x="{:.1}" y="{row_y:.1}" dominant-baseline="middle" font-size="13">{}</text>"#,
            row_y - 7.0,
            legend_x + 20.0,
            escape_html(&slice.label)
        );

        angle += sweep;
    }

    svg.push_str("</svg>");
    svg
}
