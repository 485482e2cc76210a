//! Streaming gzip-CSV to Parquet transcoding.
//!
//! One CSV record is resident at a time; rows accumulate in Arrow builders
//! and flush as a Parquet row group every [`ROW_GROUP_SIZE`] records and at
//! end of stream.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, RecordBatch, StringBuilder};
use arrow::datatypes::SchemaRef;
use flate2::read::GzDecoder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;

use super::manifest::{ColumnSchema, ColumnType};
use crate::error::{
    BatchSnafu, ColumnMismatchSnafu, ConvertError, EncodeSnafu, ShardCorruptSnafu, TempFileSnafu,
};

/// Rows buffered per Parquet row group.
pub const ROW_GROUP_SIZE: usize = 5_000;

enum ColumnBuilder {
    Utf8(StringBuilder),
    Double(Float64Builder),
}

/// Converts gzipped CSV shards into Parquet files for one column schema.
pub struct Transcoder {
    arrow_schema: SchemaRef,
    /// CSV field position of each emitted column, in manifest order.
    positions: Vec<usize>,
    types: Vec<ColumnType>,
    width: usize,
}

impl Transcoder {
    pub fn new(schema: &ColumnSchema) -> Self {
        let mut positions = Vec::new();
        let mut types = Vec::new();
        for (position, descriptor) in schema.descriptors().iter().enumerate() {
            if !descriptor.skip {
                positions.push(position);
                types.push(descriptor.column_type);
            }
        }
        Self {
            arrow_schema: schema.to_arrow(),
            positions,
            types,
            width: schema.width(),
        }
    }

    /// Transcode one shard; returns the number of data rows written.
    pub fn transcode(&self, input: &Path, output: &Path) -> Result<u64, ConvertError> {
        let file = File::open(input).context(TempFileSnafu {
            path: input.to_path_buf(),
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::new(GzDecoder::new(file)));

        // The header names are ignored; only its width is checked against
        // the manifest, which governs positions.
        let header_width = reader
            .headers()
            .context(ShardCorruptSnafu {
                path: input.to_path_buf(),
            })?
            .len();
        ensure!(
            header_width == self.width,
            ColumnMismatchSnafu {
                path: input.to_path_buf(),
                expected: self.width,
                actual: header_width,
            }
        );

        let out = File::create(output).context(TempFileSnafu {
            path: output.to_path_buf(),
        })?;
        let properties = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(ROW_GROUP_SIZE)
            .build();
        let mut writer = ArrowWriter::try_new(out, self.arrow_schema.clone(), Some(properties))
            .context(EncodeSnafu {
                path: output.to_path_buf(),
            })?;

        let mut builders = self.new_builders();
        let mut buffered = 0usize;
        let mut total = 0u64;
        let mut record = csv::StringRecord::new();
        loop {
            let more = reader.read_record(&mut record).context(ShardCorruptSnafu {
                path: input.to_path_buf(),
            })?;
            if !more {
                break;
            }
            self.append_record(&record, &mut builders);
            buffered += 1;
            total += 1;
            if buffered == ROW_GROUP_SIZE {
                self.flush(&mut writer, &mut builders, output)?;
                buffered = 0;
            }
        }
        if buffered > 0 {
            self.flush(&mut writer, &mut builders, output)?;
        }
        writer.close().context(EncodeSnafu {
            path: output.to_path_buf(),
        })?;
        Ok(total)
    }

    fn new_builders(&self) -> Vec<ColumnBuilder> {
        self.types
            .iter()
            .map(|column_type| match column_type {
                ColumnType::Utf8 => ColumnBuilder::Utf8(StringBuilder::new()),
                ColumnType::Double => ColumnBuilder::Double(Float64Builder::new()),
            })
            .collect()
    }

    fn append_record(&self, record: &csv::StringRecord, builders: &mut [ColumnBuilder]) {
        for (builder, &position) in builders.iter_mut().zip(&self.positions) {
            let cell = record.get(position).unwrap_or("");
            match builder {
                ColumnBuilder::Utf8(builder) => builder.append_value(cell),
                ColumnBuilder::Double(builder) => match cell.parse::<f64>() {
                    Ok(value) => builder.append_value(value),
                    Err(_) => builder.append_null(),
                },
            }
        }
    }

    fn flush(
        &self,
        writer: &mut ArrowWriter<File>,
        builders: &mut [ColumnBuilder],
        output: &Path,
    ) -> Result<(), ConvertError> {
        let arrays: Vec<ArrayRef> = builders
            .iter_mut()
            .map(|builder| match builder {
                ColumnBuilder::Utf8(builder) => Arc::new(builder.finish()) as ArrayRef,
                ColumnBuilder::Double(builder) => Arc::new(builder.finish()) as ArrayRef,
            })
            .collect();
        let batch = RecordBatch::try_new(self.arrow_schema.clone(), arrays).context(BatchSnafu)?;
        writer.write(&batch).context(EncodeSnafu {
            path: output.to_path_buf(),
        })
    }
}
