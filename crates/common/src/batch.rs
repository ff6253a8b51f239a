//! Row batches exchanged between connectors and the runtime.
//!
//! A [`Batch`] is an Arrow `RecordBatch` plus the delivery metadata the streaming
//! protocol needs: whether it is the last batch of the result, whether it is only a
//! close acknowledgement, and whether the connector closes itself after it.
use std::sync::Arc;

use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::ScalarValue;
use ferry_error::{ErrorCode, FerryError, Result};

/// One row, one typed value per column.
pub type Row = Vec<ScalarValue>;

#[derive(Debug, Clone)]
pub struct Batch {
    data: RecordBatch,
    /// 1-based index of the final row of the whole result; `Some` only on the final batch.
    last_row: Option<usize>,
    request_closed: bool,
    implicit_close: bool,
}

impl Batch {
    /// A non-final batch.
    pub fn new(data: RecordBatch) -> Self {
        Self {
            data,
            last_row: None,
            request_closed: false,
            implicit_close: false,
        }
    }

    /// The final batch of a result whose last row has index `last_row`.
    pub fn last(data: RecordBatch, last_row: usize) -> Self {
        Self::new(data).with_last_row(last_row)
    }

    /// An empty final batch, used when a result ends without further rows.
    pub fn empty_final(schema: SchemaRef, last_row: usize) -> Self {
        Self::last(RecordBatch::new_empty(schema), last_row)
    }

    /// Acknowledgement that the connector closed the sub-request. Carries no rows.
    pub fn closed() -> Self {
        Self {
            data: RecordBatch::new_empty(Arc::new(Schema::empty())),
            last_row: None,
            request_closed: true,
            implicit_close: false,
        }
    }

    pub fn with_last_row(mut self, last_row: usize) -> Self {
        self.last_row = Some(last_row);
        self
    }

    /// Marks that the connector releases the sub-request by itself after this batch.
    pub fn with_implicit_close(mut self, implicit_close: bool) -> Self {
        self.implicit_close = implicit_close;
        self
    }

    pub fn is_final(&self) -> bool {
        self.last_row.is_some()
    }

    pub fn last_row(&self) -> Option<usize> {
        self.last_row
    }

    pub fn is_request_closed(&self) -> bool {
        self.request_closed
    }

    pub fn supports_implicit_close(&self) -> bool {
        self.implicit_close
    }

    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.num_rows() == 0
    }

    pub fn schema(&self) -> SchemaRef {
        self.data.schema()
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.data
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.data
    }

    /// Extracts row `index` as owned scalar values.
    pub fn row(&self, index: usize) -> Result<Row> {
        if index >= self.data.num_rows() {
            return Err(FerryError::new(
                ErrorCode::InternalPanic,
                format!(
                    "Row {} requested from a batch of {} rows",
                    index,
                    self.data.num_rows()
                ),
            ));
        }
        self.data
            .columns()
            .iter()
            .map(|column| ScalarValue::try_from_array(column.as_ref(), index).map_err(Into::into))
            .collect()
    }

    pub fn rows(&self) -> Result<Vec<Row>> {
        (0..self.data.num_rows()).map(|i| self.row(i)).collect()
    }

    /// Zero-copy view of `len` rows starting at `offset`, keeping the delivery flags.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self {
            data: self.data.slice(offset, len),
            last_row: self.last_row,
            request_closed: self.request_closed,
            implicit_close: self.implicit_close,
        }
    }
}
