use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::Local;
use log::info;

use crate::database::{DatabaseManager, MetricsRow};

const HEADERS: [&str; 6] = [
    "ID",
    "Nombre de Usuario",
    "Escenarios Completados",
    "Escenarios Intentados",
    "Porcentaje de Aciertos",
    "Porcentaje de Errores",
];

/// Writes the all-users metrics snapshot as a CSV file named with the
/// generation timestamp, so repeated exports never overwrite each other.
/// Users without interactions appear with empty metric cells.
pub async fn export_metrics_csv(store: &DatabaseManager, dir: &Path) -> Result<PathBuf> {
    let rows = store.snapshot_all_users().await?;

    fs::create_dir_all(dir)
        .with_context(|| format!("creating export directory {}", dir.display()))?;
    let filename = format!(
        "metricas_usuarios_{}.csv",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(filename);

    let mut out = String::new();
    out.push_str(&HEADERS.join(","));
    out.push('\n');
    for row in &rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }

    fs::write(&path, out).with_context(|| format!("writing export file {}", path.display()))?;
    info!("Exported metrics for {} users to {}", rows.len(), path.display());
    Ok(path)
}

fn render_row(row: &MetricsRow) -> String {
    let metrics = match &row.rollup {
        Some(r) => format!(
            "{},{},{:.2},{:.2}",
            r.scenarios_completed, r.total_attempts, r.correct_percentage, r.error_percentage
        ),
        None => ",,,".to_string(),
    };
    format!("{},{},{}", row.user_id, csv_field(&row.username), metrics)
}

/// Quotes a field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Rollup;

    #[test]
    fn plain_fields_pass_through() {
        assert_eq!(csv_field("maria.lopez"), "maria.lopez");
    }

    #[test]
    fn fields_with_delimiters_get_quoted() {
        assert_eq!(csv_field("lopez, maria"), "\"lopez, maria\"");
        assert_eq!(csv_field("el \"jefe\""), "\"el \"\"jefe\"\"\"");
    }

    #[test]
    fn rows_without_rollup_leave_metric_cells_empty() {
        let row = MetricsRow {
            user_id: 4,
            username: "nuevo".to_string(),
            rollup: None,
        };
        assert_eq!(render_row(&row), "4,nuevo,,,,");
    }

    #[test]
    fn rows_with_rollup_render_two_decimals() {
        let row = MetricsRow {
            user_id: 2,
            username: "ana".to_string(),
            rollup: Some(Rollup {
                scenarios_completed: 1,
                total_attempts: 3,
                correct_percentage: 66.67,
                error_percentage: 33.33,
            }),
        };
        assert_eq!(render_row(&row), "2,ana,1,3,66.67,33.33");
    }
}
