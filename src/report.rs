use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::dup::DuplicationResult;
use crate::filter::FilterCounters;
use crate::state::RunState;
use crate::stats::ReadStats;

/// Everything the report writers need, borrowed from the finished run.
#[derive(Serialize)]
pub struct RunReport<'a> {
    pub version: &'static str,
    pub run: &'a RunState,
    pub before_filtering: &'a ReadStats,
    pub after_filtering: &'a ReadStats,
    pub filtering: &'a FilterCounters,
    pub duplication: Option<&'a DuplicationResult>,
}

impl<'a> RunReport<'a> {
    pub fn new(
        run: &'a RunState,
        before: &'a ReadStats,
        after: &'a ReadStats,
        filtering: &'a FilterCounters,
        duplication: Option<&'a DuplicationResult>,
    ) -> Self {
        RunReport {
            version: env!("CARGO_PKG_VERSION"),
            run,
            before_filtering: before,
            after_filtering: after,
            filtering,
            duplication,
        }
    }
}

pub fn write_json_report(path: &Path, report: &RunReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create JSON report {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .with_context(|| format!("Failed to write JSON report {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Polyline for the rarefaction curve, scaled into a fixed viewBox.
fn rarefaction_polyline(run: &RunState, width: f64, height: f64) -> String {
    let max_x = run.rarefaction.keys().max().copied().unwrap_or(0).max(1) as f64;
    let max_y = run.rarefaction.values().max().copied().unwrap_or(0).max(1) as f64;
    run.rarefaction
        .iter()
        .map(|(&x, &y)| {
            format!(
                "{:.1},{:.1}",
                x as f64 / max_x * width,
                height - y as f64 / max_y * height
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn write_html_report(path: &Path, report: &RunReport) -> Result<()> {
    let run = report.run;
    let dup_row = match report.duplication {
        Some(d) => format!(
            "<tr><td>Duplication rate (estimated)</td><td>{:.2}%</td></tr>",
            d.rate * 100.0
        ),
        None => String::new(),
    };
    let curve = if run.rarefaction.is_empty() {
        String::new()
    } else {
        format!(
            "<h2>Rarefaction</h2>\n\
             <svg viewBox=\"0 0 620 320\" width=\"620\" height=\"320\">\n\
             <rect x=\"0\" y=\"0\" width=\"620\" height=\"320\" fill=\"#fafafa\"/>\n\
             <polyline points=\"{}\" fill=\"none\" stroke=\"#1f77b4\" stroke-width=\"2\"/>\n\
             </svg>",
            rarefaction_polyline(run, 620.0, 320.0)
        )
    };
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\"/>\n\
         <title>orthomap report</title>\n\
         <style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:4px 10px;text-align:left}}</style>\n\
         </head>\n<body>\n<h1>orthomap {version}</h1>\n\
         <h2>Summary</h2>\n<table>\n\
         <tr><td>Total raw reads</td><td>{raw}</td></tr>\n\
         <tr><td>Clean reads</td><td>{clean} ({clean_rate:.2}%)</td></tr>\n\
         <tr><td>Mapped reads</td><td>{mapped} ({mapped_rate:.2}%)</td></tr>\n\
         <tr><td>Distinct orthologs</td><td>{distinct} of {db}</td></tr>\n\
         <tr><td>Q20 bases (before)</td><td>{q20}</td></tr>\n\
         <tr><td>Q30 bases (before)</td><td>{q30}</td></tr>\n\
         <tr><td>GC content (before)</td><td>{gc:.2}%</td></tr>\n\
         <tr><td>Elapsed</td><td>{secs:.0}s</td></tr>\n\
         {dup_row}\n</table>\n\
         <h2>Filtering</h2>\n<table>\n\
         <tr><th>Result</th><th>Reads</th></tr>\n\
         <tr><td>passed</td><td>{passed}</td></tr>\n\
         <tr><td>low quality</td><td>{lowq}</td></tr>\n\
         <tr><td>too short</td><td>{short}</td></tr>\n\
         <tr><td>too long</td><td>{long}</td></tr>\n\
         <tr><td>too many N</td><td>{many_n}</td></tr>\n\
         </table>\n{curve}\n</body>\n</html>\n",
        version = report.version,
        raw = run.total_raw_reads,
        clean = run.total_clean_reads,
        clean_rate = run.clean_reads_rate(),
        mapped = run.total_mapped_reads,
        mapped_rate = run.mapped_reads_rate(),
        distinct = run.distinct_mapped_ids,
        db = run.db_ids,
        q20 = report.before_filtering.q20_bases,
        q30 = report.before_filtering.q30_bases,
        gc = report.before_filtering.gc_rate() * 100.0,
        secs = run.seconds,
        dup_row = dup_row,
        passed = report.filtering.passed,
        lowq = report.filtering.low_quality,
        short = report.filtering.too_short,
        long = report.filtering.too_long,
        many_n = report.filtering.too_many_n,
        curve = curve,
    );
    std::fs::write(path, html)
        .with_context(|| format!("Failed to write HTML report {}", path.display()))?;
    Ok(())
}
