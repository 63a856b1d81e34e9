use std::fmt;

/// Index of a point within a time series. Steps are non-negative and increase
/// with time, potentially non-consecutively. Well-formed event files carry
/// strictly increasing steps, but that is not enforced at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Step(pub i64);

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Values that are indexed by [`Step`].
pub trait StepIndexed {
    fn step(&self) -> Step;
}

/// Shape of the data stored under a tag, which determines how it is sampled
/// and served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataClass {
    #[default]
    Unknown,
    Scalar,
    Tensor,
    BlobSequence,
}

/// Per-tag summary metadata. One metadata value is kept per `(run, tag)`
/// pair, fixed to the first non-null value ever seen for that tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SummaryMetadata {
    /// Name of the front-end plugin that owns this time series.
    pub plugin_name: String,
    /// Opaque plugin-specific payload.
    pub plugin_content: Vec<u8>,
    pub data_class: DataClass,
}

/// Element type of a tensor value. Only the types the server projects get
/// named variants; everything else is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dtype {
    #[default]
    Invalid,
    Float,
    Double,
    Int32,
    String,
    Int64,
    /// Any element type this crate does not model; the raw wire code is kept
    /// so values round-trip through responses.
    Other(i32),
}

/// An n-dimensional array of values. Mirrors the wire tensor shape: values
/// live either in one of the typed fields or packed in `content`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TensorValue {
    pub dtype: Dtype,
    /// Dimension sizes, outermost first. Empty means rank 0.
    pub shape: Vec<i64>,
    /// Packed row-major representation, if the writer chose it.
    pub content: Vec<u8>,
    pub float_val: Vec<f32>,
    pub double_val: Vec<f64>,
    pub int_val: Vec<i32>,
    pub int64_val: Vec<i64>,
    pub string_val: Vec<Vec<u8>>,
}

impl TensorValue {
    /// A rank-0 f32 tensor holding one value.
    pub fn scalar_f32(value: f32) -> Self {
        TensorValue {
            dtype: Dtype::Float,
            float_val: vec![value],
            ..TensorValue::default()
        }
    }

    /// A rank-1 string tensor holding the given byte strings.
    pub fn string_vector(values: Vec<Vec<u8>>) -> Self {
        TensorValue {
            dtype: Dtype::String,
            shape: vec![values.len() as i64],
            string_val: values,
            ..TensorValue::default()
        }
    }
}

/// An encoded image attached to a summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageValue {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

/// One tagged value within a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryValue {
    pub tag: String,
    pub metadata: Option<SummaryMetadata>,
    pub payload: SummaryPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryPayload {
    SimpleValue(f32),
    Image(ImageValue),
    Tensor(TensorValue),
    /// Summary shapes this server does not ingest.
    Other,
}

/// A decoded event-file record.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub step: Step,
    /// Seconds since the Unix epoch, as recorded by the writer.
    pub wall_time: f64,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A serialized model graph attached to the run.
    GraphDef(Vec<u8>),
    Summary(Vec<SummaryValue>),
    /// Event shapes this server ignores (file versions, session logs, ...).
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_f32_is_rank_zero() {
        let t = TensorValue::scalar_f32(0.25);
        assert_eq!(t.dtype, Dtype::Float);
        assert!(t.shape.is_empty());
        assert_eq!(t.float_val, vec![0.25]);
    }

    #[test]
    fn string_vector_shape_tracks_len() {
        let t = TensorValue::string_vector(vec![b"a".to_vec(), b"bc".to_vec()]);
        assert_eq!(t.shape, vec![2]);
        assert_eq!(t.string_val.len(), 2);
    }

    #[test]
    fn steps_order_by_value() {
        assert!(Step(3) < Step(10));
        assert_eq!(Step(7).to_string(), "7");
    }
}
