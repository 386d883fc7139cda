//! Attachment inventory shown to the oracle

use crate::task::Attachment;

pub const NO_ATTACHMENTS: &str = "No additional files provided.";

/// Render attachments as a numbered inventory, including the paths the
/// generated code should open.
pub fn summarize_attachments(attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return NO_ATTACHMENTS.to_string();
    }

    let mut lines = vec!["Available files for use in your Python code:".to_string()];
    for (i, att) in attachments.iter().enumerate() {
        let path = att
            .tmp_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not saved)".to_string());
        lines.push(format!(
            "{}. {} — {} — {} bytes — saved at {}",
            i + 1,
            att.filename,
            att.content_type,
            att.size(),
            path
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_attachments() {
        assert_eq!(summarize_attachments(&[]), "No additional files provided.");
    }

    #[test]
    fn test_inventory_keeps_order_and_duplicates() {
        let attachments = vec![
            Attachment::new("data.csv", b"x\n1\n2\n3\n".to_vec(), "text/csv")
                .with_tmp_path("/work/tmp/data_20250101_120000.csv"),
            Attachment::new("data.csv", Vec::new(), "application/octet-stream"),
        ];

        let summary = summarize_attachments(&attachments);
        let lines: Vec<&str> = summary.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Available files for use in your Python code:");
        assert_eq!(
            lines[1],
            "1. data.csv — text/csv — 8 bytes — saved at /work/tmp/data_20250101_120000.csv"
        );
        assert_eq!(
            lines[2],
            "2. data.csv — application/octet-stream — 0 bytes — saved at (not saved)"
        );
    }
}
