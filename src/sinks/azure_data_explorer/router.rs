use bytes::BytesMut;
use indexmap::IndexMap;
use tokio_util::codec::Encoder;

use crate::{
    codecs::{JsonSerializer, SerializeError},
    event::Metric,
};

/// Resolved grouping mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricsGrouping {
    TablePerMetric,
    SingleTable { table: String },
}

impl MetricsGrouping {
    fn table_for<'a>(&'a self, metric: &'a Metric) -> &'a str {
        match self {
            Self::TablePerMetric => metric.name(),
            Self::SingleTable { table } => table,
        }
    }
}

/// Serialized records bound for one table.
#[derive(Debug, Default)]
pub struct TablePayload {
    /// Number of metrics in `bytes`.
    pub count: usize,
    pub bytes: BytesMut,
}

/// Splits a batch into per-table payloads.
#[derive(Clone, Debug)]
pub struct MetricRouter {
    grouping: MetricsGrouping,
    serializer: JsonSerializer,
}

impl MetricRouter {
    pub const fn new(grouping: MetricsGrouping, serializer: JsonSerializer) -> Self {
        Self {
            grouping,
            serializer,
        }
    }

    /// Tables are returned in the order they first appear in `metrics`, and
    /// each payload keeps its metrics in arrival order. Nothing is returned
    /// unless every metric serialized.
    pub fn route(
        &self,
        metrics: Vec<Metric>,
    ) -> Result<IndexMap<String, TablePayload>, SerializeError> {
        let mut serializer = self.serializer;
        let mut payloads = IndexMap::<String, TablePayload>::new();

        for metric in metrics {
            let table = self.grouping.table_for(&metric);
            let index = match payloads.get_index_of(table) {
                Some(index) => index,
                None => payloads.insert_full(table.to_owned(), TablePayload::default()).0,
            };
            let payload = &mut payloads[index];
            payload.count += 1;
            serializer.encode(metric, &mut payload.bytes)?;
        }

        Ok(payloads)
    }
}
