//! Parquet snapshot of the commitments view.

use std::path::{Path, PathBuf};

use common::{
    arrow::array::RecordBatch,
    parquet::{arrow::ArrowWriter, errors::ParquetError},
};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error writing parquet export")]
    Io(#[from] std::io::Error),

    #[error("failed to encode parquet")]
    Parquet(#[from] ParquetError),

    #[error("export task failed")]
    Blocking(#[source] tokio::task::JoinError),
}

/// Replaces the file at `path` with `batch` encoded as Parquet.
///
/// The data is written next to `path` first and renamed into place, so readers see either the
/// previous snapshot or the new one.
pub async fn write_parquet(batch: RecordBatch, path: PathBuf) -> Result<(), ExportError> {
    tokio::task::spawn_blocking(move || write_parquet_blocking(&batch, &path))
        .await
        .map_err(ExportError::Blocking)?
}

fn write_parquet_blocking(batch: &RecordBatch, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("parquet.tmp");
    let file = fs_err::File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    fs_err::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), rows = batch.num_rows(), "exported commitments");
    Ok(())
}

#[cfg(test)]
mod tests {
    use common::{parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder, tables::commitments};

    use super::*;

    fn row_count(path: &Path) -> usize {
        let file = std::fs::File::open(path).expect("should open export");
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .expect("should read parquet metadata")
            .build()
            .expect("should build reader");
        reader
            .map(|batch| batch.expect("should decode batch").num_rows())
            .sum()
    }

    #[tokio::test]
    async fn export_replaces_previous_snapshot() {
        //* Given
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("out").join("commitments.parquet");
        let empty = RecordBatch::new_empty(commitments::SCHEMA.clone());
        write_parquet(empty.clone(), path.clone())
            .await
            .expect("should write first snapshot");

        //* When
        write_parquet(empty, path.clone())
            .await
            .expect("should overwrite snapshot");

        //* Then
        assert_eq!(row_count(&path), 0);
        assert!(!path.with_extension("parquet.tmp").exists());
    }
}
