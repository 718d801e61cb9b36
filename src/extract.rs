use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::PortalConfig;
use crate::html;
use crate::literal::{self, Literal, Node};
use crate::models::{AttendanceRecord, MarkValue, RawMarksTable};

static DATA_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdata\s*:\s*\{").expect("static regex must compile"));
static COLUMNS_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bcolumns\s*:\s*\[").expect("static regex must compile"));
static CATEGORIES_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bcategories\s*:\s*\[").expect("static regex must compile"));
static GAUGE_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\btype\s*:\s*["']gauge["']"#).expect("static regex must compile")
});
static BAR_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\btype\s*:\s*["']bar["']"#).expect("static regex must compile")
});

/// Pulls attendance and CIE marks out of the chart calls on the portal's
/// dashboard page.
#[derive(Debug, Clone)]
pub struct ChartRecordExtractor {
    attendance_chart_id: String,
    marks_chart_id: String,
}

impl ChartRecordExtractor {
    pub fn new(config: &PortalConfig) -> Self {
        Self {
            attendance_chart_id: config.attendance_chart_id.clone(),
            marks_chart_id: config.marks_chart_id.clone(),
        }
    }

    /// Attendance from the gauge chart. `None` when no script carries a
    /// readable gauge chart; `Some(vec![])` when the chart lists no
    /// subjects.
    pub fn extract_attendance(&self, html: &str) -> Option<Vec<AttendanceRecord>> {
        for script in html::script_blocks(html) {
            if !self.is_attendance_script(script) {
                continue;
            }
            let chart = chart_call(script, &self.attendance_chart_id);
            match parse_attendance(chart) {
                Some(records) => {
                    debug!(subjects = records.len(), "parsed attendance chart");
                    return Some(records);
                }
                None => warn!("attendance chart script found but its data could not be read"),
            }
        }
        debug!("no attendance chart on page");
        None
    }

    /// CIE marks from the stacked bar chart. `None` when no script carries a
    /// readable marks chart.
    pub fn extract_marks(&self, html: &str) -> Option<RawMarksTable> {
        for script in html::script_blocks(html) {
            if !self.is_marks_script(script) {
                continue;
            }
            let config = chart_call(script, &self.marks_chart_id);
            match parse_marks(config) {
                Some(table) => {
                    debug!(subjects = table.len(), "parsed marks chart");
                    return Some(table);
                }
                None => warn!("marks chart script found but its data could not be read"),
            }
        }
        debug!("no marks chart on page");
        None
    }

    fn is_attendance_script(&self, script: &str) -> bool {
        script.contains(&self.attendance_chart_id)
            && GAUGE_TYPE_RE.is_match(script)
            && script.contains("columns")
    }

    fn is_marks_script(&self, script: &str) -> bool {
        script.contains(&self.marks_chart_id)
            && BAR_TYPE_RE.is_match(script)
            && script.contains("categories")
    }
}

/// Narrows a script to the `bb.generate(...)` call bound to `chart_id`, so
/// other charts in the same script cannot lend it their arrays. Scripts
/// without such a call are used whole.
fn chart_call<'a>(script: &'a str, chart_id: &str) -> &'a str {
    let starts: Vec<usize> = script.match_indices("bb.generate").map(|(i, _)| i).collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(script.len());
            &script[start..end]
        })
        .find(|call| call.contains(&format!("#{chart_id}")))
        .unwrap_or(script)
}

/// Parses the array that follows the first match of `key_re` at or after
/// `from`.
fn array_after<'a>(text: &'a str, key_re: &Regex, from: usize) -> Option<Node<'a>> {
    let found = key_re.find_at(text, from)?;
    // the pattern ends on the opening bracket
    let open = found.end() - 1;
    match literal::parse_at(text, open) {
        Ok(node) if node.as_array().is_some() => Some(node),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "chart array literal is malformed");
            None
        }
    }
}

fn parse_attendance(chart: &str) -> Option<Vec<AttendanceRecord>> {
    let data_start = DATA_KEY_RE.find(chart)?.start();
    let columns = array_after(chart, &COLUMNS_KEY_RE, data_start)?;

    let mut records = Vec::new();
    for pair in columns.as_array()? {
        match attendance_pair(pair) {
            Some(record) => records.push(record),
            None => warn!(entry = pair.text, "skipping unreadable attendance entry"),
        }
    }
    Some(records)
}

fn attendance_pair(node: &Node<'_>) -> Option<AttendanceRecord> {
    let [label, value] = node.as_array()? else {
        return None;
    };
    let subject_code = label.as_label()?.trim();
    if subject_code.is_empty() {
        return None;
    }
    let value = match &value.value {
        Literal::Number(n) => *n,
        Literal::Str(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if value.fract() != 0.0 || !(0.0..=100.0).contains(&value) {
        return None;
    }
    Some(AttendanceRecord {
        subject_code: subject_code.to_string(),
        percentage: value as u8,
    })
}

fn parse_marks(chart: &str) -> Option<RawMarksTable> {
    let categories = array_after(chart, &CATEGORIES_KEY_RE, 0)?;
    let subjects: Vec<&str> = categories
        .as_array()?
        .iter()
        .filter_map(Node::as_label)
        .map(str::trim)
        .collect();
    if subjects.is_empty() {
        warn!("marks chart has no categories");
        return None;
    }

    let columns = array_after(chart, &COLUMNS_KEY_RE, 0)?;
    let mut table = RawMarksTable::new();
    for subject in &subjects {
        table.entry(subject.to_string()).or_default();
    }

    for row in columns.as_array()? {
        let Some((exam_type, values)) = row.as_array().and_then(|cells| cells.split_first())
        else {
            warn!(row = row.text, "skipping marks row that is not an array");
            continue;
        };
        let Some(exam_type) = exam_type.as_label().map(str::trim) else {
            warn!(row = row.text, "skipping marks row without an exam label");
            continue;
        };
        if values.len() > subjects.len() {
            warn!(
                exam_type,
                extra = values.len() - subjects.len(),
                "marks row is longer than the category list"
            );
        }

        // Cells carry no keys; the n-th value belongs to the n-th category.
        for (index, subject) in subjects.iter().enumerate() {
            let mark = values.get(index).map(mark_value).unwrap_or(MarkValue::Missing);
            if let Some(marks) = table.get_mut(*subject) {
                marks.insert(exam_type.to_string(), mark);
            }
        }
    }
    Some(table)
}

fn mark_value(node: &Node<'_>) -> MarkValue {
    if node.is_null() {
        return MarkValue::Missing;
    }
    match &node.value {
        Literal::Number(n) => MarkValue::Score(*n),
        Literal::Str(s) if s.trim().is_empty() => MarkValue::Missing,
        Literal::Str(s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => MarkValue::Score(n),
            _ => MarkValue::Raw(s.clone()),
        },
        _ => MarkValue::Raw(node.text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ChartRecordExtractor {
        ChartRecordExtractor::new(&PortalConfig::default())
    }

    fn page(script: &str) -> String {
        format!("<html><head><script src=\"billboard.js\"></script></head><body><script>{script}</script></body></html>")
    }

    const GAUGE_SCRIPT: &str = r##"
        var chart = bb.generate({
            bindto: "#gaugeTypeMulti",
            data: {
                columns: [
                    ["CSC601", 82],
                    ['CSL601', 100],
                    ["CSC602", 67]
                ],
                type: "gauge",
            },
            gauge: { type: "multi" }
        });
    "##;

    const MARKS_SCRIPT: &str = r##"
        var gauge = bb.generate({
            bindto: "#gaugeTypeMulti",
            data: { columns: [["CSC601", 90]], type: "gauge" }
        });
        var chart = bb.generate({
            bindto: "#stackedBarChart_1",
            axis: { x: { type: "category", categories: ["CSC601", 'CSC602', "CSL601"] } },
            data: {
                columns: [
                    ["MSE", 18, 16, null],
                    ["TH-ISE1", "19", "", "null"],
                    ['PR-ISE1', null, null, 45],
                    ["ESE", 36, AB]
                ],
                type: "bar",
                groups: [["MSE", "TH-ISE1", "PR-ISE1", "ESE"]]
            }
        });
    "##;

    #[test]
    fn attendance_pairs_in_column_order() {
        let records = extractor().extract_attendance(&page(GAUGE_SCRIPT)).unwrap();
        let got: Vec<(&str, u8)> = records
            .iter()
            .map(|r| (r.subject_code.as_str(), r.percentage))
            .collect();
        assert_eq!(got, vec![("CSC601", 82), ("CSL601", 100), ("CSC602", 67)]);
    }

    #[test]
    fn attendance_absent_without_gauge_chart() {
        let html = page(r##"var x = { columns: [["CSC601", 82]] };"##);
        assert_eq!(extractor().extract_attendance(&html), None);
        assert_eq!(extractor().extract_attendance("<html></html>"), None);
    }

    #[test]
    fn attendance_empty_gauge_is_an_empty_list() {
        let html = page(
            r##"bb.generate({ bindto: "#gaugeTypeMulti", data: { columns: [], type: "gauge" } });"##,
        );
        assert_eq!(extractor().extract_attendance(&html), Some(vec![]));
    }

    #[test]
    fn attendance_ignores_a_bar_chart_declared_first() {
        let script = r##"
            bb.generate({
                bindto: "#stackedBarChart_1",
                axis: { x: { categories: ["CSC601"] } },
                data: { columns: [["MSE", 18]], type: "bar" }
            });
            bb.generate({
                bindto: "#gaugeTypeMulti",
                data: { columns: [["CSC601", 82], ["CSC602", 67]], type: "gauge" }
            });
        "##;
        let records = extractor().extract_attendance(&page(script)).unwrap();
        let got: Vec<(&str, u8)> = records
            .iter()
            .map(|r| (r.subject_code.as_str(), r.percentage))
            .collect();
        assert_eq!(got, vec![("CSC601", 82), ("CSC602", 67)]);
    }

    #[test]
    fn attendance_skips_malformed_script_and_uses_next() {
        let broken = r##"bb.generate({ bindto: "#gaugeTypeMulti", data: { columns: [["CSC601", 8 , type: "gauge" } });"##;
        let html = format!("<script>{broken}</script><script>{GAUGE_SCRIPT}</script>");
        let records = extractor().extract_attendance(&html).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn attendance_drops_out_of_range_entries() {
        let html = page(
            r##"bb.generate({ bindto: "#gaugeTypeMulti", data: { columns: [["A", 50], ["B", 120], ["C", 12.5], ["D"]], type: "gauge" } });"##,
        );
        let records = extractor().extract_attendance(&html).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_code, "A");
    }

    #[test]
    fn marks_align_values_by_position() {
        let table = extractor().extract_marks(&page(MARKS_SCRIPT)).unwrap();
        assert_eq!(table.len(), 3);

        let csc601 = &table["CSC601"];
        assert_eq!(csc601["MSE"], MarkValue::Score(18.0));
        assert_eq!(csc601["TH-ISE1"], MarkValue::Score(19.0));
        assert_eq!(csc601["PR-ISE1"], MarkValue::Missing);
        assert_eq!(csc601["ESE"], MarkValue::Score(36.0));

        let csc602 = &table["CSC602"];
        assert_eq!(csc602["MSE"], MarkValue::Score(16.0));
        assert_eq!(csc602["TH-ISE1"], MarkValue::Missing);
        assert_eq!(csc602["ESE"], MarkValue::Raw("AB".to_string()));

        let csl601 = &table["CSL601"];
        assert_eq!(csl601["TH-ISE1"], MarkValue::Missing);
        assert_eq!(csl601["PR-ISE1"], MarkValue::Score(45.0));
    }

    #[test]
    fn short_rows_are_padded_with_missing() {
        let table = extractor().extract_marks(&page(MARKS_SCRIPT)).unwrap();
        // "ESE" lists two values for three categories
        assert_eq!(table["CSL601"]["ESE"], MarkValue::Missing);
        assert_eq!(table["CSC602"]["ESE"], MarkValue::Raw("AB".to_string()));
    }

    #[test]
    fn marks_ignore_other_charts_in_the_same_script() {
        let table = extractor().extract_marks(&page(MARKS_SCRIPT)).unwrap();
        assert!(table.values().all(|marks| marks.len() == 4));
    }

    #[test]
    fn long_rows_drop_extra_values() {
        let html = page(
            r##"bb.generate({ bindto: "#stackedBarChart_1", axis: { x: { categories: ["X1"] } },
               data: { columns: [["MSE", 10, 11, 12]], type: "bar" } });"##,
        );
        let table = extractor().extract_marks(&html).unwrap();
        assert_eq!(table["X1"]["MSE"], MarkValue::Score(10.0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn marks_absent_without_bar_chart() {
        assert_eq!(extractor().extract_marks(&page(GAUGE_SCRIPT)), None);
    }

    #[test]
    fn marks_absent_when_categories_empty() {
        let html = page(
            r##"bb.generate({ bindto: "#stackedBarChart_1", axis: { x: { categories: [] } },
               data: { columns: [["MSE"]], type: "bar" } });"##,
        );
        assert_eq!(extractor().extract_marks(&html), None);
    }

    #[test]
    fn chart_ids_come_from_config() {
        let config = PortalConfig {
            marks_chart_id: "cieChart".to_string(),
            ..PortalConfig::default()
        };
        let html = page(
            r##"bb.generate({ bindto: "#cieChart", axis: { x: { categories: ["X1"] } },
               data: { columns: [["MSE", 7]], type: "bar" } });"##,
        );
        let table = ChartRecordExtractor::new(&config).extract_marks(&html).unwrap();
        assert_eq!(table["X1"]["MSE"], MarkValue::Score(7.0));
        assert_eq!(extractor().extract_marks(&html), None);
    }
}
