use csv::WriterBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::clustering::{cluster_counts, PairwiseResult};
use crate::data::{is_missing_text, INCOMPLETE};
use crate::database::{ClusteredStudent, StudentRecord};
use crate::error::ApiError;
use crate::pdf::{PdfError, PdfWriter, Style};

pub const NOT_AVAILABLE: &str = "N/A";
const PREVIEW_ROWS: usize = 10;

pub type Distribution = BTreeMap<String, usize>;

pub fn distribution<'a>(values: impl IntoIterator<Item = &'a str>) -> Distribution {
    let mut counts = Distribution::new();
    for value in values {
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Key with the highest count; ties go to the first key in order.
pub fn most_common(dist: &Distribution) -> String {
    dist.iter()
        .fold(None::<(&String, usize)>, |best, (key, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((key, count)),
        })
        .map(|(key, _)| key.clone())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn number_text(value: f64) -> String {
    if value < 0.0 {
        NOT_AVAILABLE.to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_students: usize,
    pub most_common_program: String,
    pub most_common_municipality: String,
    pub most_common_sex: String,
    pub most_common_income: String,
    pub most_common_shs: String,
    pub most_common_school: String,
    pub most_common_honors: String,
    pub sex_distribution: Distribution,
    pub program_distribution: Distribution,
    pub municipality_distribution: Distribution,
    pub income_distribution: Distribution,
    pub shs_distribution: Distribution,
    pub school_distribution: Distribution,
    pub honors_distribution: Distribution,
}

impl DashboardStats {
    pub fn from_students(students: &[StudentRecord]) -> Self {
        let sex = distribution(students.iter().map(|s| s.sex.as_str()));
        let program = distribution(students.iter().map(|s| s.program.as_str()));
        let municipality = distribution(students.iter().map(|s| s.municipality.as_str()));
        let income = distribution(students.iter().map(|s| s.income_category.as_str()));
        let shs = distribution(students.iter().map(|s| s.shs_type.as_str()));
        let school = distribution(
            students
                .iter()
                .map(|s| s.shs_origin.as_str())
                .filter(|o| !is_missing_text(o) && *o != INCOMPLETE),
        );
        let honors = distribution(students.iter().map(|s| s.honors.as_str()));

        DashboardStats {
            total_students: students.len(),
            most_common_program: most_common(&program),
            most_common_municipality: most_common(&municipality),
            most_common_sex: most_common(&sex),
            most_common_income: most_common(&income),
            most_common_shs: most_common(&shs),
            most_common_school: most_common(&school),
            most_common_honors: most_common(&honors),
            sex_distribution: sex,
            program_distribution: program,
            municipality_distribution: municipality,
            income_distribution: income,
            shs_distribution: shs,
            school_distribution: school,
            honors_distribution: honors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    DashboardSummary,
    IncomeAnalysis,
    HonorsReport,
    MunicipalityReport,
    ShsReport,
    ClusterAnalysis,
}

impl ReportKind {
    pub fn slug(&self) -> &'static str {
        match self {
            ReportKind::DashboardSummary => "dashboard_summary",
            ReportKind::IncomeAnalysis => "income_analysis",
            ReportKind::HonorsReport => "honors_report",
            ReportKind::MunicipalityReport => "municipality_report",
            ReportKind::ShsReport => "shs_report",
            ReportKind::ClusterAnalysis => "cluster_analysis",
        }
    }
}

impl FromStr for ReportKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard_summary" => Ok(ReportKind::DashboardSummary),
            "income_analysis" => Ok(ReportKind::IncomeAnalysis),
            "honors_report" => Ok(ReportKind::HonorsReport),
            "municipality_report" => Ok(ReportKind::MunicipalityReport),
            "shs_report" => Ok(ReportKind::ShsReport),
            "cluster_analysis" => Ok(ReportKind::ClusterAnalysis),
            _ => Err(ApiError::bad_request("Invalid report type")),
        }
    }
}

/// A rendered-agnostic report: summary block, chart data and a student table.
#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub summary: Vec<(String, String)>,
    pub charts: Vec<(String, Distribution)>,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
    pub recommendations: String,
}

fn counts_summary(dist: Distribution) -> Vec<(String, String)> {
    dist.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}

pub fn build_report(kind: ReportKind, students: &[ClusteredStudent]) -> Report {
    let records: Vec<&StudentRecord> = students.iter().map(|c| &c.student).collect();
    let dist = |f: fn(&StudentRecord) -> &str| distribution(records.iter().map(|s| f(s)));

    match kind {
        ReportKind::DashboardSummary => {
            let sex = dist(|s| &s.sex);
            let program = dist(|s| &s.program);
            let municipality = dist(|s| &s.municipality);
            let income = dist(|s| &s.income_category);
            let shs = dist(|s| &s.shs_type);
            let origin = dist(|s| &s.shs_origin);
            let honors = dist(|s| &s.honors);

            Report {
                title: "Dashboard Summary Report".into(),
                summary: vec![
                    ("Total Students".into(), records.len().to_string()),
                    ("Most Common Sex".into(), most_common(&sex)),
                    ("Most Common Program".into(), most_common(&program)),
                    ("Most Common Municipality".into(), most_common(&municipality)),
                    ("Most Common Income Category".into(), most_common(&income)),
                    ("Most Common SHS Type".into(), most_common(&shs)),
                    ("Most Common SHS Origin (School)".into(), most_common(&origin)),
                    ("Most Common Honors".into(), most_common(&honors)),
                ],
                charts: vec![
                    ("Sex Distribution".into(), sex),
                    ("Program Distribution".into(), program),
                    ("Municipality Distribution".into(), municipality),
                    ("Income Distribution".into(), income),
                    ("SHS Type Distribution".into(), shs),
                    ("SHS Origin Distribution".into(), origin),
                    ("Honors Distribution".into(), honors),
                ],
                headers: vec![
                    "Firstname", "Lastname", "Sex", "Program", "Municipality", "Income",
                    "SHS Type", "SHS Origin", "GWA", "Honors", "IncomeCategory",
                ],
                rows: records
                    .iter()
                    .map(|s| {
                        vec![
                            s.firstname.clone(),
                            s.lastname.clone(),
                            s.sex.clone(),
                            s.program.clone(),
                            s.municipality.clone(),
                            number_text(s.income),
                            s.shs_type.clone(),
                            s.shs_origin.clone(),
                            number_text(s.gwa),
                            s.honors.clone(),
                            s.income_category.clone(),
                        ]
                    })
                    .collect(),
                recommendations: "These insights help guide scholarship allocation (income), \
                    curriculum planning (programs), student outreach (municipalities), and academic \
                    support initiatives (SHS type and origin)."
                    .into(),
            }
        }
        ReportKind::IncomeAnalysis => Report {
            title: "Income Analysis Report".into(),
            summary: counts_summary(dist(|s| &s.income_category)),
            charts: Vec::new(),
            headers: vec!["Firstname", "Lastname", "Income", "IncomeCategory"],
            rows: records
                .iter()
                .map(|s| {
                    vec![
                        s.firstname.clone(),
                        s.lastname.clone(),
                        number_text(s.income),
                        s.income_category.clone(),
                    ]
                })
                .collect(),
            recommendations: "Income analysis identifies which income groups need financial \
                assistance or scholarships most."
                .into(),
        },
        ReportKind::HonorsReport => Report {
            title: "Honors Report".into(),
            summary: counts_summary(dist(|s| &s.honors)),
            charts: Vec::new(),
            headers: vec!["Firstname", "Lastname", "GWA", "Honors"],
            rows: records
                .iter()
                .map(|s| {
                    vec![
                        s.firstname.clone(),
                        s.lastname.clone(),
                        number_text(s.gwa),
                        s.honors.clone(),
                    ]
                })
                .collect(),
            recommendations: "This report recognizes high-performing students and supports \
                honors-based incentives."
                .into(),
        },
        ReportKind::MunicipalityReport => Report {
            title: "Municipality Report".into(),
            summary: counts_summary(dist(|s| &s.municipality)),
            charts: Vec::new(),
            headers: vec!["Firstname", "Lastname", "Municipality"],
            rows: records
                .iter()
                .map(|s| vec![s.firstname.clone(), s.lastname.clone(), s.municipality.clone()])
                .collect(),
            recommendations: "Shows which municipalities contribute the most students, for \
                outreach and partnerships."
                .into(),
        },
        ReportKind::ShsReport => {
            let shs = dist(|s| &s.shs_type);
            let origin = dist(|s| &s.shs_origin);
            Report {
                title: "Senior High School Background Report".into(),
                summary: vec![
                    ("Most Common SHS Type".into(), most_common(&shs)),
                    ("Most Common SHS Origin".into(), most_common(&origin)),
                    ("Total Unique SHS Origins".into(), origin.len().to_string()),
                ],
                charts: vec![
                    ("SHS Type Distribution".into(), shs),
                    ("SHS Origin Distribution".into(), origin),
                ],
                headers: vec!["Firstname", "Lastname", "SHS Type", "SHS Origin (School)"],
                rows: records
                    .iter()
                    .map(|s| {
                        vec![
                            s.firstname.clone(),
                            s.lastname.clone(),
                            s.shs_type.clone(),
                            s.shs_origin.clone(),
                        ]
                    })
                    .collect(),
                recommendations: "SHS type and origin point to preparation gaps and to the \
                    feeder schools contributing most enrollees, for bridging programs and \
                    school partnerships."
                    .into(),
            }
        }
        ReportKind::ClusterAnalysis => {
            let counts = cluster_counts(
                students
                    .iter()
                    .filter_map(|c| c.cluster_number)
                    .map(|n| n as usize),
            );
            let summary = if counts.is_empty() {
                vec![("No clusters found".to_string(), "0".to_string())]
            } else {
                counts
                    .into_iter()
                    .map(|(n, count)| (format!("Cluster {n}"), count.to_string()))
                    .collect()
            };

            let mut sorted: Vec<&ClusteredStudent> = students.iter().collect();
            sorted.sort_by(|a, b| {
                let key = |c: &ClusteredStudent| c.cluster_number.unwrap_or(i64::MAX);
                key(a)
                    .cmp(&key(b))
                    .then(a.student.gwa.total_cmp(&b.student.gwa))
            });

            Report {
                title: "Cluster Analysis Report".into(),
                summary,
                charts: Vec::new(),
                headers: vec!["Cluster", "Firstname", "Lastname", "GWA", "Income"],
                rows: sorted
                    .iter()
                    .map(|c| {
                        vec![
                            c.cluster_number
                                .map(|n| n.to_string())
                                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                            c.student.firstname.clone(),
                            c.student.lastname.clone(),
                            number_text(c.student.gwa),
                            number_text(c.student.income),
                        ]
                    })
                    .collect(),
                recommendations: "Cluster analysis groups students by performance and financial \
                    background (GWA and income) for targeted academic support and financial aid."
                    .into(),
            }
        }
    }
}

impl Report {
    /// `Summary,Count` block, a blank line, then the student table.
    pub fn to_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut summary = WriterBuilder::new().from_writer(Vec::new());
        summary.write_record(["Summary", "Count"])?;
        for (key, value) in &self.summary {
            summary.write_record([key, value])?;
        }
        let mut buffer = summary.into_inner().map_err(|e| e.into_error())?;
        buffer.push(b'\n');

        let mut table = WriterBuilder::new().from_writer(buffer);
        table.write_record(&self.headers)?;
        for row in &self.rows {
            table.write_record(row)?;
        }
        Ok(table.into_inner().map_err(|e| e.into_error())?)
    }

    /// Title, summary, chart counts, recommendations, then the full table.
    pub fn to_pdf(&self) -> Result<Vec<u8>, PdfError> {
        let mut pdf = PdfWriter::new(&self.title)?;
        pdf.text(&self.title, Style::Title);
        pdf.space(6.0);

        pdf.text("Summary Statistics", Style::Heading);
        for (key, value) in &self.summary {
            pdf.text(&format!("{key}: {value}"), Style::Body);
        }

        for (name, dist) in &self.charts {
            pdf.space(4.0);
            pdf.text(name, Style::Heading);
            let total: usize = dist.values().sum();
            for (key, count) in dist {
                let share = if total == 0 { 0.0 } else { *count as f64 * 100.0 / total as f64 };
                pdf.text(&format!("{key}: {count} ({share:.1}%)"), Style::Body);
            }
        }

        if !self.recommendations.is_empty() {
            pdf.space(4.0);
            pdf.text("Insights & Recommendations", Style::Heading);
            pdf.text(&self.recommendations, Style::Body);
        }

        pdf.space(4.0);
        pdf.text("Student List", Style::Heading);
        pdf.table(&self.headers, &self.rows);
        pdf.finish()
    }

    pub fn to_html_preview(&self) -> String {
        let mut html = String::new();
        let _ = writeln!(html, "<h1>{} (Preview)</h1>", escape_html(&self.title));
        html.push_str("<h2>Summary Statistics</h2>\n<ul>\n");
        for (key, value) in &self.summary {
            let _ = writeln!(
                html,
                "<li><strong>{}:</strong> {}</li>",
                escape_html(key),
                escape_html(value)
            );
        }
        html.push_str("</ul>\n");

        for (name, dist) in &self.charts {
            let _ = writeln!(html, "<h3>{}</h3>\n<ul>", escape_html(name));
            for (key, count) in dist {
                let _ = writeln!(html, "<li>{}: {count}</li>", escape_html(key));
            }
            html.push_str("</ul>\n");
        }

        if !self.recommendations.is_empty() {
            let _ = writeln!(
                html,
                "<h3>Recommendations</h3>\n<p>{}</p>",
                escape_html(&self.recommendations)
            );
        }

        let _ = writeln!(html, "<h3>Sample Students (top {PREVIEW_ROWS})</h3>");
        html.push_str("<table border=1 style='border-collapse:collapse; width:100%'><thead><tr>");
        for header in &self.headers {
            let _ = write!(html, "<th style='padding:6px'>{}</th>", escape_html(header));
        }
        html.push_str("</tr></thead><tbody>\n");
        for row in self.rows.iter().take(PREVIEW_ROWS) {
            html.push_str("<tr>");
            for cell in row {
                let _ = write!(html, "<td style='padding:6px'>{}</td>", escape_html(cell));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody></table>\n");
        html.push_str(
            "<p><em>This is a lightweight preview. Use the export endpoint to download the full PDF or CSV.</em></p>",
        );
        html
    }
}

/// Playground fit laid out as a report, for PDF export.
pub fn playground_report(result: &PairwiseResult) -> Report {
    let counts: Distribution = cluster_counts(result.students.iter().map(|p| p.cluster))
        .into_iter()
        .map(|(cluster, count)| (format!("Cluster {cluster}"), count))
        .collect();
    Report {
        title: format!("Playground Cluster Report (k={})", result.k),
        summary: counts.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
        charts: vec![("Cluster Distribution".into(), counts)],
        headers: vec![
            "Firstname",
            "Lastname",
            "Program",
            "Municipality",
            "Income",
            "Income Category",
            "SHS Type",
            "SHS Origin",
            "GWA",
            "Honors",
            "Cluster",
        ],
        rows: result
            .students
            .iter()
            .map(|p| {
                let s = &p.student;
                vec![
                    s.firstname.clone(),
                    s.lastname.clone(),
                    s.program.clone(),
                    s.municipality.clone(),
                    number_text(s.income),
                    s.income_category.clone(),
                    s.shs_type.clone(),
                    s.shs_origin.clone(),
                    number_text(s.gwa),
                    s.honors.clone(),
                    p.cluster.to_string(),
                ]
            })
            .collect(),
        recommendations: String::new(),
    }
}

/// Cluster counts followed by one line per clustered student.
pub fn playground_csv(result: &PairwiseResult) -> Result<Vec<u8>, csv::Error> {
    let mut counts = WriterBuilder::new().from_writer(Vec::new());
    counts.write_record(["Cluster", "Count"])?;
    for (cluster, count) in cluster_counts(result.students.iter().map(|p| p.cluster)) {
        counts.write_record([format!("Cluster {cluster}"), count.to_string()])?;
    }
    let mut buffer = counts.into_inner().map_err(|e| e.into_error())?;
    buffer.push(b'\n');

    let mut table = WriterBuilder::new().from_writer(buffer);
    table.write_record(["Firstname", "Lastname", "GWA", "Income", "Cluster"])?;
    for p in &result.students {
        table.write_record([
            p.student.firstname.clone(),
            p.student.lastname.clone(),
            number_text(p.student.gwa),
            number_text(p.student.income),
            p.cluster.to_string(),
        ])?;
    }
    Ok(table.into_inner().map_err(|e| e.into_error())?)
}

/// Every stored column of a dataset, headed by the wire names.
pub fn students_csv(students: &[StudentRecord]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    for student in students {
        writer.serialize(student)?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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
