//! JSON, Markdown and HTML output for processed recordings.
//!
//! The HTML report is a single self-contained document built from a shared
//! base stylesheet and per-section tables. All text derived from input data
//! is escaped before it is embedded.

use std::path::Path;

use serde::Serialize;

use highd_core::{Result, Severity};

use crate::pipeline::RecordingOutputs;

pub const MARKDOWN_REPORT: &str = "report.md";
pub const HTML_REPORT: &str = "report.html";

const BASE_CSS: &str = r#"* { box-sizing: border-box; }
body { font-family: 'Segoe UI', Arial, sans-serif; margin: 0; padding: 24px; background: #f7f9fc; color: #202124; }
h1 { margin-top: 0; }
.summary-grid { display: flex; flex-wrap: wrap; gap: 16px; margin-bottom: 24px; }
.stat-card { flex: 1 1 240px; background: #fff; border: 1px solid #e0e7ff; border-radius: 8px; padding: 16px; }
.stat-card .label { font-size: 12px; color: #5f6368; text-transform: uppercase; letter-spacing: 0.08em; }
.stat-card .value { font-size: 26px; color: #1a73e8; font-weight: 600; margin-top: 8px; }
.section { margin-bottom: 40px; }
.section h2 { border-bottom: 2px solid #1a73e8; padding-bottom: 6px; }
table { width: 100%; border-collapse: collapse; margin-bottom: 24px; background: #fff; font-size: 14px; }
th { background: #eef2ff; font-weight: 600; padding: 8px; text-align: left; border: 1px solid #e0e7ff; }
td { padding: 8px; border: 1px solid #e0e7ff; font-variant-numeric: tabular-nums; }
.severity { background: #fff; border: 1px solid #e0e7ff; border-radius: 8px; padding: 16px; margin-bottom: 24px; }
.severity-row { display: flex; align-items: center; gap: 12px; margin: 6px 0; }
.severity-label { width: 36px; font-weight: 600; }
.severity-bar { flex: 1; height: 12px; background: #e8f0fe; border-radius: 6px; overflow: hidden; }
.severity-bar-fill { height: 100%; background: #1a73e8; }
.severity-value { width: 120px; text-align: right; }
footer { margin-top: 32px; color: #5f6368; font-size: 13px; }"#;

// ---------------------------------------------------------------------------
// JSON / Markdown
// ---------------------------------------------------------------------------

/// Write `value` as pretty-printed JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Markdown report: one section per result, each embedded as JSON.
pub fn render_markdown(outputs: &RecordingOutputs) -> Result<String> {
    let sections = [
        ("Roadway Structure", serde_json::to_string_pretty(&outputs.structure)?),
        ("Traffic Flow", serde_json::to_string_pretty(&outputs.flow)?),
        ("AADT Estimate", serde_json::to_string_pretty(&outputs.aadt)?),
        ("HSM Prediction", serde_json::to_string_pretty(&outputs.prediction)?),
    ];

    let mut s = format!("# highD Recording {}\n", outputs.structure.recording_id);
    for (title, json) in sections {
        s.push_str(&format!("\n## {title}\n\n```json\n{json}\n```\n"));
    }
    Ok(s)
}

pub fn write_markdown_report(out_dir: &Path, outputs: &RecordingOutputs) -> Result<()> {
    std::fs::write(out_dir.join(MARKDOWN_REPORT), render_markdown(outputs)?)?;
    Ok(())
}

pub fn write_html_report(out_dir: &Path, outputs: &RecordingOutputs) -> Result<()> {
    std::fs::write(out_dir.join(HTML_REPORT), render_html(outputs))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fixed-point number with `,` thousands separators. Non-finite values
/// render as `-`.
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }
    let fixed = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3 + 2);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let is_zero = fixed.bytes().all(|b| b == b'0' || b == b'.');
    let mut s = String::new();
    if value < 0.0 && !is_zero {
        s.push('-');
    }
    s.push_str(&grouped);
    if let Some(frac) = frac_part {
        s.push('.');
        s.push_str(frac);
    }
    s
}

pub fn format_percentage(share: f64) -> String {
    format!("{}%", format_number(share * 100.0, 1))
}

/// Table with escaped headers. Cells are inserted as given and must already
/// be escaped.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut s = String::from("<table><thead><tr>");
    for header in headers {
        s.push_str(&format!("<th>{}</th>", escape_html(header)));
    }
    s.push_str("</tr></thead><tbody>");
    for row in rows {
        s.push_str("<tr>");
        for cell in row {
            s.push_str(&format!("<td>{cell}</td>"));
        }
        s.push_str("</tr>");
    }
    s.push_str("</tbody></table>");
    s
}

fn render_severity_bars(outputs: &RecordingOutputs) -> String {
    let prediction = &outputs.prediction;
    let total = prediction.total_all_sev;
    let mut s = String::new();
    for (level, crashes) in prediction.severity_breakdown.iter() {
        let share = if total > 0.0 { crashes / total } else { 0.0 };
        let width = (share * 100.0).clamp(0.0, 100.0);
        s.push_str(&format!(
            "<div class=\"severity-row\"><span class=\"severity-label\">{level}</span>\
             <div class=\"severity-bar\"><div class=\"severity-bar-fill\" style=\"width:{width:.1}%\"></div></div>\
             <span class=\"severity-value\">{}</span></div>",
            format_number(crashes, 2)
        ));
    }
    s
}

// ---------------------------------------------------------------------------
// HTML report
// ---------------------------------------------------------------------------

fn render_page(title: &str, body: &str) -> String {
    let mut s = String::with_capacity(body.len() + BASE_CSS.len() + 512);
    s.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    s.push_str("<meta charset=\"UTF-8\">\n");
    s.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n");
    s.push_str("<title>");
    s.push_str(title);
    s.push_str("</title>\n<style>\n");
    s.push_str(BASE_CSS);
    s.push_str("\n</style>\n</head>\n<body>\n");
    s.push_str(body);
    s.push_str("\n</body>\n</html>\n");
    s
}

/// Render the full HTML safety summary for one recording.
pub fn render_html(outputs: &RecordingOutputs) -> String {
    let RecordingOutputs {
        structure,
        flow,
        aadt,
        prediction,
    } = outputs;
    let title = format!("highD Safety Summary: {}", escape_html(&structure.recording_id));

    let mut body = format!("<h1>{title}</h1>\n<div class=\"summary-grid\">");
    let cards = [
        ("Segment length (m)", format_number(structure.segment_length_m, 2)),
        ("Total lanes", structure.lane_count_total.to_string()),
        ("Total hourly flow (veh/h)", format_number(flow.hourly_flow_total, 2)),
        ("Total AADT (veh/day)", format_number(aadt.aadt_total, 2)),
        ("Predicted crashes (annual)", format_number(prediction.total_all_sev, 2)),
        ("Economic loss (USD)", format_number(prediction.economic_loss.total, 2)),
    ];
    for (label, value) in cards {
        body.push_str(&format!(
            "<div class=\"stat-card\"><div class=\"label\">{}</div><div class=\"value\">{value}</div></div>",
            escape_html(label)
        ));
    }
    body.push_str("</div>\n");

    // Structure
    body.push_str("<div class=\"section\"><h2>Roadway Structure</h2>");
    let timestamp = structure.timestamp.as_deref().unwrap_or("-");
    body.push_str(&render_table(
        &["Metric", "Value"],
        &[
            vec!["Recording ID".into(), escape_html(&structure.recording_id)],
            vec!["Recorded at".into(), escape_html(timestamp)],
            vec!["Speed limit (km/h)".into(), format_number(structure.speed_limit_kmh, 2)],
            vec!["Observation duration (s)".into(), format_number(structure.duration_sec, 2)],
            vec!["Average lanes per direction".into(), format_number(structure.lane_count_mean, 2)],
        ],
    ));
    let lane_rows: Vec<Vec<String>> = structure
        .directions
        .iter()
        .map(|(direction, info)| {
            let widths = &info.lane_widths;
            vec![
                direction.to_string(),
                info.lane_count.to_string(),
                format_number(widths.mean, 2),
                format_number(widths.std, 2),
                format_number(widths.min, 2),
                format_number(widths.max, 2),
            ]
        })
        .collect();
    if !lane_rows.is_empty() {
        body.push_str("<h3>Directional Lane Geometry</h3>");
        body.push_str(&render_table(
            &["Direction", "Lane count", "Mean width (m)", "Std dev (m)", "Min width (m)", "Max width (m)"],
            &lane_rows,
        ));
    }
    body.push_str("</div>\n");

    // Flow
    body.push_str("<div class=\"section\"><h2>Traffic Flow</h2>");
    let flow_rows: Vec<Vec<String>> = flow
        .directions
        .iter()
        .map(|(direction, info)| {
            let shares = info
                .class_shares
                .iter()
                .map(|(class, share)| format!("{}: {}", class.as_str(), format_percentage(*share)))
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                direction.to_string(),
                format_number(info.vehicle_count as f64, 0),
                format_number(info.hourly_flow_veh_per_h, 2),
                format_number(info.avg_speed_m_s, 2),
                if shares.is_empty() { "-".to_string() } else { shares },
            ]
        })
        .collect();
    body.push_str(&render_table(
        &["Direction", "Unique vehicles", "Hourly flow (veh/h)", "Avg speed (m/s)", "Vehicle class shares"],
        &flow_rows,
    ));
    let series_rows: Vec<Vec<String>> = flow
        .directions
        .iter()
        .flat_map(|(direction, info)| {
            info.timeseries_1min.iter().map(move |bin| {
                vec![
                    direction.to_string(),
                    format_number(bin.bin_start_sec, 0),
                    format_number(bin.bin_end_sec, 0),
                    bin.vehicles.to_string(),
                ]
            })
        })
        .collect();
    if !series_rows.is_empty() {
        body.push_str("<h3>1-minute Flow Time Series</h3>");
        body.push_str(&render_table(&["Direction", "Start (s)", "End (s)", "Vehicles"], &series_rows));
    }
    body.push_str("</div>\n");

    // AADT
    body.push_str("<div class=\"section\"><h2>AADT Estimation</h2>");
    let aadt_rows: Vec<Vec<String>> = aadt
        .directions
        .iter()
        .map(|(direction, info)| {
            let c = &info.scaling_components;
            let mut parts = vec![format!("base_hours: {}", format_number(c.base_hours, 2))];
            let optional = [
                ("weekday_factor", c.weekday_factor),
                ("month_factor", c.month_factor),
                ("hour_share", c.hour_share),
            ];
            for (name, value) in optional {
                if let Some(v) = value {
                    parts.push(format!("{name}: {}", format_number(v, 2)));
                }
            }
            vec![
                direction.to_string(),
                format_number(info.hourly_flow, 2),
                format_number(info.aadt, 2),
                parts.join(", "),
            ]
        })
        .collect();
    body.push_str(&render_table(
        &["Direction", "Hourly flow", "AADT", "Scaling components"],
        &aadt_rows,
    ));
    body.push_str("</div>\n");

    // Prediction
    body.push_str("<div class=\"section\"><h2>HSM Crash Prediction</h2>");
    let collision_rows: Vec<Vec<String>> = prediction
        .collision_types
        .iter()
        .map(|(name, c)| {
            vec![
                escape_html(&name.to_uppercase()),
                format_number(c.fi, 2),
                format_number(c.pdo, 2),
                format_number(c.total, 2),
                format_number(c.economic_loss.total, 2),
            ]
        })
        .collect();
    if !collision_rows.is_empty() {
        body.push_str(&render_table(
            &["Collision type", "FI crashes", "PDO crashes", "Total", "Economic loss (USD)"],
            &collision_rows,
        ));
    }
    body.push_str("<div class=\"severity\"><h3>KABCO Severity Distribution</h3>");
    body.push_str(&render_severity_bars(outputs));
    body.push_str("</div>");

    let total = prediction.total_all_sev;
    let severity_rows: Vec<Vec<String>> = Severity::ALL
        .iter()
        .map(|&level| {
            let crashes = prediction.severity_breakdown[level];
            let share = if total > 0.0 { crashes / total } else { 0.0 };
            vec![
                level.to_string(),
                format_number(crashes, 2),
                format_percentage(share),
                format_number(prediction.economic_loss.by_severity[level], 2),
            ]
        })
        .collect();
    body.push_str(&render_table(
        &["Severity", "Expected crashes", "Share", "Economic loss (USD)"],
        &severity_rows,
    ));
    body.push_str(&format!(
        "<p>Overdispersion k = {}, calibration C = {}</p>",
        format_number(prediction.k_overdispersion, 3),
        format_number(prediction.calibration_c, 3)
    ));
    body.push_str("</div>\n");

    body.push_str(
        "<footer>Generated from highD observations using Highway Safety Manual methods.</footer>",
    );

    render_page(&title, &body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RecordingProcessor;
    use highd_core::{HsmConfig, PipelineConfig};

    fn sample_outputs() -> RecordingOutputs {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../highd-core/tests/data/highd_sample/01");
        let out = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineConfig::new("freeway", "urban");
        pipeline.output_reports = false;
        RecordingProcessor::from_config(pipeline, HsmConfig::default())
            .unwrap()
            .process(&dir, out.path())
            .unwrap()
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.0, 2), "0.00");
        assert_eq!(format_number(999.6, 0), "1,000");
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-1234.5, 1), "-1,234.5");
        assert_eq!(format_number(123.0, 0), "123");
        assert_eq!(format_number(-0.001, 2), "0.00");
        assert_eq!(format_number(f64::NAN, 2), "-");
        assert_eq!(format_number(f64::INFINITY, 2), "-");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(0.25), "25.0%");
        assert_eq!(format_percentage(0.0), "0.0%");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"A&B\"</b> 'x'"),
            "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt; &#x27;x&#x27;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_render_table() {
        let html = render_table(&["A<1>"], &[vec!["x".into()]]);
        assert_eq!(
            html,
            "<table><thead><tr><th>A&lt;1&gt;</th></tr></thead><tbody><tr><td>x</td></tr></tbody></table>"
        );
    }

    #[test]
    fn test_html_report_sections() {
        let outputs = sample_outputs();
        let html = render_html(&outputs);
        assert!(html.starts_with("<!DOCTYPE html>"));
        for heading in [
            "Roadway Structure",
            "Directional Lane Geometry",
            "Traffic Flow",
            "1-minute Flow Time Series",
            "AADT Estimation",
            "HSM Crash Prediction",
            "KABCO Severity Distribution",
        ] {
            assert!(html.contains(heading), "missing section {heading}");
        }
        assert!(html.contains("<td>SV</td>"));
        assert!(html.contains("truck: 20.0%"));
        assert_eq!(html.matches("class=\"severity-row\"").count(), 5);
    }

    #[test]
    fn test_html_escapes_recording_id() {
        let mut outputs = sample_outputs();
        outputs.structure.recording_id = "<script>".to_string();
        let html = render_html(&outputs);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_markdown_report() {
        let outputs = sample_outputs();
        let md = render_markdown(&outputs).unwrap();
        assert!(md.starts_with("# highD Recording 1\n"));
        for heading in ["## Roadway Structure", "## Traffic Flow", "## AADT Estimate", "## HSM Prediction"] {
            assert!(md.contains(heading));
        }
        assert!(md.contains("\"calibration_C\": 1.0"));
    }

    #[test]
    fn test_write_json_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &serde_json::json!({"a": [1, 2]})).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"a\""));
    }
}
