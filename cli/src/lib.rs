use std::fmt;
use std::fs;
use std::path::Path;

use cells::{AnalysisConfig, ImageAnalysisResult, Recommendation, RunReport};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CellKitError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Analysis(#[from] cells::CellError),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// Reading and writing an [`AnalysisConfig`] as TOML or JSON
pub trait ConfigFile: Sized {
    fn from_toml(content: &str) -> Result<Self, CellKitError>;
    fn from_json(content: &str) -> Result<Self, CellKitError>;
    fn to_toml(&self) -> Result<String, CellKitError>;
    fn to_json(&self) -> Result<String, CellKitError>;

    /// Load configuration from a TOML file
    fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, CellKitError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a JSON file
    fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CellKitError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Auto-detect file format and load configuration
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CellKitError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(CellKitError::UnsupportedFileFormat),
        }
    }

    /// Save configuration as TOML
    fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CellKitError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

impl ConfigFile for AnalysisConfig {
    fn from_toml(content: &str) -> Result<Self, CellKitError> {
        let config: AnalysisConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn from_json(content: &str) -> Result<Self, CellKitError> {
        let config: AnalysisConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn to_toml(&self) -> Result<String, CellKitError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn to_json(&self) -> Result<String, CellKitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// JSON schema of the configuration file
pub fn config_schema() -> Result<String, CellKitError> {
    let schema = schemars::schema_for!(AnalysisConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}

const RULE: &str = "----------------------------------------------------------------------";

/// Human-readable report in the layout printed at the end of a run
pub fn render_report(report: &RunReport) -> String {
    ReportText(report).to_string()
}

/// Per-cell measurement table for one image
pub fn render_cells(image_id: &str, result: &ImageAnalysisResult) -> String {
    CellTable { image_id, result }.to_string()
}

struct ReportText<'a>(&'a RunReport);

impl fmt::Display for ReportText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "IMAGE ANALYSIS REPORT")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "SUMMARY OF FINDINGS")?;
        writeln!(f, "    > Images analyzed: {}", report.images_analyzed)?;
        writeln!(f, "    > Total Cells: {}", report.total_cells)?;
        writeln!(f, "    > Normal Cells: {}", report.total_normal)?;
        writeln!(f, "    > Abnormal Cells: {}", report.total_abnormal)?;
        writeln!(
            f,
            "    > Percentage Abnormality: {:.1}%",
            report.percentage_abnormality
        )?;

        writeln!(f)?;
        writeln!(f, "INDIVIDUAL IMAGE RESULTS")?;
        for summary in &report.images {
            write!(
                f,
                "    > {}: {} cells, {:.1}% abnormal, {} template hits",
                display_name(&summary.image_id),
                summary.cells,
                summary.abnormality_rate,
                summary.template_hits
            )?;
            if let Some(boundaries) = summary.boundary_count {
                write!(f, ", {} boundaries", boundaries)?;
            }
            writeln!(f, " - {}", summary.status)?;
        }

        if !report.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "SKIPPED")?;
            for skipped in &report.skipped {
                writeln!(f, "    > {}: {}", display_name(&skipped.image_id), skipped.reason)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "RECOMMENDATION")?;
        let advice = match report.recommendation {
            Recommendation::High => "ABNORMALLY HIGH!\nPatient recommended for further investigation",
            Recommendation::Moderate => "MODERATE ABNORMALITY\nPatient needs close supervision",
            Recommendation::Normal => "PATIENT IS NORMAL",
        };
        writeln!(f, "{}", advice)?;
        writeln!(f, "{}", RULE)
    }
}

struct CellTable<'a> {
    image_id: &'a str,
    result: &'a ImageAnalysisResult,
}

impl fmt::Display for CellTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.result;
        writeln!(
            f,
            "{} ({}x{}): {} regions, {} cells",
            display_name(self.image_id),
            result.width,
            result.height,
            result.region_count,
            result.cell_count()
        )?;
        for cell in &result.cells {
            writeln!(
                f,
                "    Cell {}: Area={}, Perimeter={:.1}, Circularity={:.3}, Eccentricity={:.3}, {}",
                cell.id, cell.area, cell.perimeter, cell.circularity, cell.eccentricity, cell.diagnosis
            )?;
        }
        for (name, hits) in result.template_hits.iter() {
            writeln!(f, "    Template {}: {} hits", name, hits)?;
        }
        Ok(())
    }
}

fn display_name(image_id: &str) -> &str {
    Path::new(image_id)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(image_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cells::{aggregate, AnalysisSession, CellPipeline, TemplateMatcher};
    use image::{DynamicImage, GrayImage};

    #[test]
    fn test_config_toml_round_trip() {
        let mut config = AnalysisConfig::default();
        config.preprocess.block_size = 15;
        config.boundaries.enabled = true;

        let toml = config.to_toml().expect("Config should serialize");
        let parsed = AnalysisConfig::from_toml(&toml).expect("Config should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalysisConfig::from_json(r#"{ "templates": { "threshold": 0.8 } }"#)
            .expect("Partial config should parse");
        assert_eq!(config.templates.threshold, 0.8);
        assert_eq!(config.templates.circle_size, 25);
        assert_eq!(config.preprocess.block_size, 11);
    }

    #[test]
    fn test_invalid_config_is_rejected_on_load() {
        let err = AnalysisConfig::from_toml("[preprocess]\nblock_size = 4\n")
            .expect_err("Even block size should fail");
        assert!(matches!(err, CellKitError::Analysis(_)));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = AnalysisConfig::from_file("config.yaml").expect_err("yaml is not supported");
        assert!(matches!(err, CellKitError::UnsupportedFileFormat));
    }

    #[test]
    fn test_schema_mentions_sections() {
        let schema = config_schema().expect("Schema should serialize");
        assert!(schema.contains("preprocess"));
        assert!(schema.contains("classification"));
    }

    #[test]
    fn test_render_report_layout() {
        let pipeline = CellPipeline::default();
        let mut session = AnalysisSession::new();
        session.record(
            "slides/black.png",
            pipeline.analyze_image(&DynamicImage::ImageLuma8(GrayImage::new(32, 32))),
        );
        session.record_failure("slides/broken.png", "corrupt header");

        let text = render_report(&session.report());
        assert!(text.contains("Images analyzed: 1"));
        assert!(text.contains("black.png: 0 cells, 0.0% abnormal, 0 template hits - normal"));
        assert!(text.contains("broken.png: corrupt header"));
        assert!(text.contains("PATIENT IS NORMAL"));
    }

    #[test]
    fn test_render_empty_report() {
        let report = aggregate(Vec::<(&String, &ImageAnalysisResult)>::new());
        let text = render_report(&report);
        assert!(text.contains("Percentage Abnormality: 0.0%"));
        assert!(!text.contains("SKIPPED"));
        assert!(text.ends_with(&format!("{}\n", RULE)));
    }

    #[test]
    fn test_render_cells_lists_templates() {
        let result = CellPipeline::default().analyze_gray(&GrayImage::new(32, 24));
        let text = render_cells("slides/black.png", &result);
        assert!(text.starts_with("black.png (32x24): 0 regions, 0 cells\n"));
        assert!(text.contains(&format!("Template {}: 0 hits", TemplateMatcher::NORMAL_CELL)));
    }
}
