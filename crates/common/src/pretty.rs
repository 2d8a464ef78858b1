use tabled::{Table, builder::Builder, settings};

/// Predefined output styles that map to `tabled` styles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableStyleKind {
    #[default]
    Modern,
    Ascii,
    Plain,
}

impl TableStyleKind {
    fn apply(self, table: &mut Table) {
        match self {
            Self::Modern => table.with(settings::Style::modern()),
            Self::Ascii => table.with(settings::Style::ascii()),
            Self::Plain => table.with(settings::Style::empty()),
        };
    }
}

/// Render result rows as a human-friendly table. The first row is treated
/// as the header when present; `None` cells render as `NULL`.
pub fn render_result_rows(rows: &[Vec<Option<String>>], style: TableStyleKind) -> String {
    if rows.is_empty() {
        return "<empty>".into();
    }

    let mut builder = Builder::default();
    for row in rows {
        builder.push_record(row.iter().map(format_cell));
    }

    let mut table = builder.build();
    style.apply(&mut table);
    table.to_string()
}

/// Format a single result cell for display.
pub fn format_cell(cell: &Option<String>) -> String {
    match cell {
        Some(text) => text.clone(),
        None => "NULL".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_render_with_header_and_null() {
        let rows = vec![
            vec![Some("id".to_string()), Some("name".to_string())],
            vec![Some("1".to_string()), None],
        ];

        let rendered = render_result_rows(&rows, TableStyleKind::Ascii);
        assert!(rendered.contains("id"));
        assert!(rendered.contains("NULL"));
    }

    #[test]
    fn empty_result_renders_placeholder() {
        assert_eq!(render_result_rows(&[], TableStyleKind::Plain), "<empty>");
    }
}
