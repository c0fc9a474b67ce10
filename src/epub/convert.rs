//! Optional conversion of the generic EPUB into a device-specific variant
//! (e.g. Kobo's kepub) by an external program.

use crate::epub::{EpubFile, EPUB_EXTENSION};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("converter {program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("converter produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Turns a container file at `source` into a converted file at `destination`.
#[async_trait]
pub trait ContainerConverter: Send + Sync {
    /// Inserted before the extension of the converted file name.
    fn qualifier(&self) -> &str;

    async fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConvertError>;
}

/// Runs an external command. `{input}` and `{output}` in the arguments are
/// replaced by the source and destination paths.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
    qualifier: String,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            qualifier: "kepub".to_string(),
        }
    }

    /// kepubify's command line: `kepubify -o <output> <input>`.
    pub fn kepubify(program: impl Into<String>) -> Self {
        Self::new(
            program,
            vec!["-o".into(), "{output}".into(), "{input}".into()],
        )
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }
}

#[async_trait]
impl ContainerConverter for CommandConverter {
    fn qualifier(&self) -> &str {
        &self.qualifier
    }

    async fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConvertError> {
        let input = source.to_string_lossy();
        let output = destination.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect();

        tracing::debug!(program = %self.program, args = ?args, "Running converter");
        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            return Err(ConvertError::Failed {
                program: self.program.clone(),
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Converts `file` inside a scratch directory and returns the converted
/// bytes named `<stem>.<qualifier>.epub`. The scratch directory is removed
/// whether or not conversion succeeds.
pub async fn convert_container(
    converter: &dyn ContainerConverter,
    file: &EpubFile,
) -> Result<EpubFile, ConvertError> {
    let scratch = tempfile::tempdir()?;
    let stem = file
        .filename
        .strip_suffix(&format!(".{EPUB_EXTENSION}"))
        .unwrap_or(&file.filename);
    let filename = format!("{stem}.{}.{EPUB_EXTENSION}", converter.qualifier());

    let source = scratch.path().join("source.epub");
    let destination = scratch.path().join("converted.epub");
    tokio::fs::write(&source, &file.bytes).await?;

    converter.convert(&source, &destination).await?;

    let bytes = match tokio::fs::read(&destination).await {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return Err(ConvertError::MissingOutput(destination)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::MissingOutput(destination))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(filename = %filename, bytes = bytes.len(), "Converted container");
    Ok(EpubFile { filename, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> EpubFile {
        EpubFile {
            filename: "2025 Jun 3 - 2025 Jun 10.epub".into(),
            bytes: b"PK-not-really".to_vec(),
        }
    }

    struct Uppercase;

    #[async_trait]
    impl ContainerConverter for Uppercase {
        fn qualifier(&self) -> &str {
            "upper"
        }

        async fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConvertError> {
            let bytes = tokio::fs::read(source).await?;
            tokio::fs::write(destination, bytes.to_ascii_uppercase()).await?;
            Ok(())
        }
    }

    struct Silent;

    #[async_trait]
    impl ContainerConverter for Silent {
        fn qualifier(&self) -> &str {
            "none"
        }

        async fn convert(&self, _source: &Path, _destination: &Path) -> Result<(), ConvertError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_convert_renames_with_qualifier() {
        let converted = convert_container(&Uppercase, &file()).await.unwrap();
        assert_eq!(converted.filename, "2025 Jun 3 - 2025 Jun 10.upper.epub");
        assert_eq!(converted.bytes, b"PK-NOT-REALLY".to_vec());
    }

    #[tokio::test]
    async fn test_missing_output_is_error() {
        let result = convert_container(&Silent, &file()).await;
        assert!(matches!(result, Err(ConvertError::MissingOutput(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_converter_substitutes_paths() {
        let converter = CommandConverter::new("cp", vec!["{input}".into(), "{output}".into()]);
        let converted = convert_container(&converter, &file()).await.unwrap();
        assert_eq!(converted.filename, "2025 Jun 3 - 2025 Jun 10.kepub.epub");
        assert_eq!(converted.bytes, file().bytes);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_reports_status() {
        let converter = CommandConverter::new("false", vec![]);
        let result = convert_container(&converter, &file()).await;
        assert!(matches!(result, Err(ConvertError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_unknown_program_is_io_error() {
        let converter = CommandConverter::kepubify("definitely-not-a-real-converter-binary");
        let result = convert_container(&converter, &file()).await;
        assert!(matches!(result, Err(ConvertError::Io(_))));
    }
}
