pub mod sink;
pub mod csv_writer;

pub use sink::{MetricsLogger, MetricsSink, NullSink};
pub use csv_writer::CsvScalarWriter;
