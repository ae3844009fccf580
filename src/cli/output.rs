//! Output formatting for CLI commands

use crate::pane::PaneRecord;
use anyhow::Result;

/// 按 --json 选择 JSON 或表格输出
pub fn format_records(records: &[PaneRecord], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(records)?);
    }
    if records.is_empty() {
        return Ok("没有 pane".to_string());
    }

    let mut out = format!("{:<6} {:<9} {:<8} {}\n", "PANE", "ROLE", "PID", "TARGET");
    for record in records {
        out.push_str(&format!(
            "{:<6} {:<9} {:<8} {}\n",
            record.pane_id.as_str(),
            record.role.to_string(),
            record.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            record.target.as_deref().unwrap_or("-")
        ));
    }
    Ok(out.trim_end().to_string())
}

pub fn print_records(records: &[PaneRecord], json: bool) -> Result<()> {
    println!("{}", format_records(records, json)?);
    Ok(())
}
