#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Conversions between the generated wire types and the in-memory model.
//! Decoding is lossy by design: event and summary shapes the server does not
//! ingest collapse to the `Other` variants. Structurally invalid payloads
//! (negative image dimensions) fail with [`ConvertError`].

use prost::Message;
use thiserror::Error;

use runlog_core::types as core;
use runlog_proto::v1 as wire;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("undecodable event: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("{field} must be non-negative, got {value}")]
    NegativeField { field: &'static str, value: i64 },
}

pub trait ToWire<T> {
    fn to_wire(&self) -> T;
}

pub trait ToCore<T> {
    fn to_core(&self) -> T;
}

pub trait TryToCore<T> {
    type Error;
    fn try_to_core(&self) -> Result<T, Self::Error>;
}

/// Decodes one raw event-file record payload.
pub fn decode_event(bytes: &[u8]) -> Result<core::Event, ConvertError> {
    let event = wire::Event::decode(bytes)?;
    event.try_to_core()
}

/// Encodes an event for writing into an event file.
pub fn encode_event(event: &core::Event) -> Vec<u8> {
    let wire: wire::Event = event.to_wire();
    wire.encode_to_vec()
}

fn non_negative(field: &'static str, value: i64) -> Result<(), ConvertError> {
    if value < 0 {
        return Err(ConvertError::NegativeField { field, value });
    }
    Ok(())
}

fn data_class_to_core(raw: i32) -> core::DataClass {
    match wire::DataClass::try_from(raw) {
        Ok(wire::DataClass::Scalar) => core::DataClass::Scalar,
        Ok(wire::DataClass::Tensor) => core::DataClass::Tensor,
        Ok(wire::DataClass::BlobSequence) => core::DataClass::BlobSequence,
        _ => core::DataClass::Unknown,
    }
}

fn data_class_to_wire(class: core::DataClass) -> wire::DataClass {
    match class {
        core::DataClass::Unknown => wire::DataClass::Unknown,
        core::DataClass::Scalar => wire::DataClass::Scalar,
        core::DataClass::Tensor => wire::DataClass::Tensor,
        core::DataClass::BlobSequence => wire::DataClass::BlobSequence,
    }
}

fn dtype_to_core(raw: i32) -> core::Dtype {
    match wire::DataType::try_from(raw) {
        Ok(wire::DataType::DtInvalid) => core::Dtype::Invalid,
        Ok(wire::DataType::DtFloat) => core::Dtype::Float,
        Ok(wire::DataType::DtDouble) => core::Dtype::Double,
        Ok(wire::DataType::DtInt32) => core::Dtype::Int32,
        Ok(wire::DataType::DtString) => core::Dtype::String,
        Ok(wire::DataType::DtInt64) => core::Dtype::Int64,
        Err(_) => core::Dtype::Other(raw),
    }
}

fn dtype_to_wire(dtype: core::Dtype) -> i32 {
    match dtype {
        core::Dtype::Invalid => wire::DataType::DtInvalid as i32,
        core::Dtype::Float => wire::DataType::DtFloat as i32,
        core::Dtype::Double => wire::DataType::DtDouble as i32,
        core::Dtype::Int32 => wire::DataType::DtInt32 as i32,
        core::Dtype::String => wire::DataType::DtString as i32,
        core::Dtype::Int64 => wire::DataType::DtInt64 as i32,
        core::Dtype::Other(raw) => raw,
    }
}

impl ToCore<core::TensorValue> for wire::TensorProto {
    fn to_core(&self) -> core::TensorValue {
        core::TensorValue {
            dtype: dtype_to_core(self.dtype),
            shape: self
                .tensor_shape
                .as_ref()
                .map(|shape| shape.dim.iter().map(|dim| dim.size).collect())
                .unwrap_or_default(),
            content: self.tensor_content.clone(),
            float_val: self.float_val.clone(),
            double_val: self.double_val.clone(),
            int_val: self.int_val.clone(),
            int64_val: self.int64_val.clone(),
            string_val: self.string_val.clone(),
        }
    }
}

impl ToWire<wire::TensorProto> for core::TensorValue {
    fn to_wire(&self) -> wire::TensorProto {
        wire::TensorProto {
            dtype: dtype_to_wire(self.dtype),
            tensor_shape: Some(wire::TensorShapeProto {
                dim: self
                    .shape
                    .iter()
                    .map(|&size| wire::tensor_shape_proto::Dim {
                        size,
                        name: String::new(),
                    })
                    .collect(),
                unknown_rank: false,
            }),
            tensor_content: self.content.clone(),
            float_val: self.float_val.clone(),
            double_val: self.double_val.clone(),
            int_val: self.int_val.clone(),
            int64_val: self.int64_val.clone(),
            string_val: self.string_val.clone(),
        }
    }
}

impl ToCore<core::SummaryMetadata> for wire::SummaryMetadata {
    fn to_core(&self) -> core::SummaryMetadata {
        let (plugin_name, plugin_content) = match &self.plugin_data {
            Some(plugin) => (plugin.plugin_name.clone(), plugin.content.clone()),
            None => (String::new(), Vec::new()),
        };
        core::SummaryMetadata {
            plugin_name,
            plugin_content,
            data_class: data_class_to_core(self.data_class),
        }
    }
}

impl ToWire<wire::SummaryMetadata> for core::SummaryMetadata {
    fn to_wire(&self) -> wire::SummaryMetadata {
        wire::SummaryMetadata {
            plugin_data: Some(wire::summary_metadata::PluginData {
                plugin_name: self.plugin_name.clone(),
                content: self.plugin_content.clone(),
            }),
            display_name: String::new(),
            summary_description: String::new(),
            data_class: data_class_to_wire(self.data_class) as i32,
        }
    }
}

impl TryToCore<core::SummaryValue> for wire::summary::Value {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<core::SummaryValue, Self::Error> {
        let payload = match &self.value {
            Some(wire::summary::value::Value::SimpleValue(v)) => {
                core::SummaryPayload::SimpleValue(*v)
            }
            Some(wire::summary::value::Value::Image(image)) => {
                non_negative("image width", i64::from(image.width))?;
                non_negative("image height", i64::from(image.height))?;
                core::SummaryPayload::Image(core::ImageValue {
                    width: image.width,
                    height: image.height,
                    data: image.encoded_image_string.clone(),
                })
            }
            Some(wire::summary::value::Value::Tensor(tensor)) => {
                core::SummaryPayload::Tensor(tensor.to_core())
            }
            None => core::SummaryPayload::Other,
        };
        Ok(core::SummaryValue {
            tag: self.tag.clone(),
            metadata: self.metadata.as_ref().map(ToCore::to_core),
            payload,
        })
    }
}

impl ToWire<wire::summary::Value> for core::SummaryValue {
    fn to_wire(&self) -> wire::summary::Value {
        let value = match &self.payload {
            core::SummaryPayload::SimpleValue(v) => {
                Some(wire::summary::value::Value::SimpleValue(*v))
            }
            core::SummaryPayload::Image(image) => {
                Some(wire::summary::value::Value::Image(wire::summary::Image {
                    height: image.height,
                    width: image.width,
                    colorspace: 0,
                    encoded_image_string: image.data.clone(),
                }))
            }
            core::SummaryPayload::Tensor(tensor) => {
                Some(wire::summary::value::Value::Tensor(tensor.to_wire()))
            }
            core::SummaryPayload::Other => None,
        };
        wire::summary::Value {
            tag: self.tag.clone(),
            metadata: self.metadata.as_ref().map(ToWire::to_wire),
            value,
        }
    }
}

impl TryToCore<core::Event> for wire::Event {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<core::Event, Self::Error> {
        let payload = match &self.what {
            Some(wire::event::What::GraphDef(bytes)) => core::EventPayload::GraphDef(bytes.clone()),
            Some(wire::event::What::Summary(summary)) => core::EventPayload::Summary(
                summary
                    .value
                    .iter()
                    .map(TryToCore::try_to_core)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(wire::event::What::FileVersion(_)) | None => core::EventPayload::Other,
        };
        Ok(core::Event {
            step: core::Step(self.step),
            wall_time: self.wall_time,
            payload,
        })
    }
}

impl ToWire<wire::Event> for core::Event {
    fn to_wire(&self) -> wire::Event {
        let what = match &self.payload {
            core::EventPayload::GraphDef(bytes) => {
                Some(wire::event::What::GraphDef(bytes.clone()))
            }
            core::EventPayload::Summary(values) => Some(wire::event::What::Summary(wire::Summary {
                value: values.iter().map(ToWire::to_wire).collect(),
            })),
            core::EventPayload::Other => None,
        };
        wire::Event {
            wall_time: self.wall_time,
            step: self.step.0,
            what,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_version_decodes_to_other() {
        let event = wire::Event {
            wall_time: 12.5,
            step: 0,
            what: Some(wire::event::What::FileVersion("brain.Event:2".to_string())),
        };
        let decoded = decode_event(&event.encode_to_vec()).unwrap();
        assert_eq!(decoded.payload, core::EventPayload::Other);
        assert_eq!(decoded.wall_time, 12.5);
    }

    #[test]
    fn summary_value_roundtrips_through_wire() {
        let value = core::SummaryValue {
            tag: "loss".to_string(),
            metadata: Some(core::SummaryMetadata {
                plugin_name: "scalars".to_string(),
                plugin_content: Vec::new(),
                data_class: core::DataClass::Scalar,
            }),
            payload: core::SummaryPayload::Tensor(core::TensorValue::scalar_f32(0.5)),
        };
        let event = core::Event {
            step: core::Step(3),
            wall_time: 100.0,
            payload: core::EventPayload::Summary(vec![value.clone()]),
        };

        let decoded = decode_event(&encode_event(&event)).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn truncated_bytes_are_a_decode_error() {
        // Field 1 is declared as a double but the byte string ends early.
        let err = decode_event(&[0x09, 0x01]).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)));
    }

    #[test]
    fn negative_image_dimensions_are_rejected() {
        let event = wire::Event {
            wall_time: 1.0,
            step: 0,
            what: Some(wire::event::What::Summary(wire::Summary {
                value: vec![wire::summary::Value {
                    tag: "samples".to_string(),
                    metadata: None,
                    value: Some(wire::summary::value::Value::Image(wire::summary::Image {
                        height: -1,
                        width: 28,
                        colorspace: 3,
                        encoded_image_string: b"png".to_vec(),
                    })),
                }],
            })),
        };
        let err = event.try_to_core().unwrap_err();
        match err {
            ConvertError::NegativeField { field, value } => {
                assert_eq!(field, "image height");
                assert_eq!(value, -1);
            }
            other => panic!("want NegativeField, got {other:?}"),
        }
        assert!(decode_event(&event.encode_to_vec()).is_err());
    }

    #[test]
    fn metadata_without_plugin_data_has_empty_name() {
        let meta = wire::SummaryMetadata {
            plugin_data: None,
            display_name: String::new(),
            summary_description: String::new(),
            data_class: wire::DataClass::Tensor as i32,
        };
        let converted: core::SummaryMetadata = meta.to_core();
        assert_eq!(converted.plugin_name, "");
        assert_eq!(converted.data_class, core::DataClass::Tensor);
    }

    #[test]
    fn unknown_dtype_codes_are_preserved() {
        let tensor = wire::TensorProto {
            dtype: 42,
            tensor_shape: None,
            tensor_content: Vec::new(),
            float_val: Vec::new(),
            double_val: Vec::new(),
            int_val: Vec::new(),
            string_val: Vec::new(),
            int64_val: Vec::new(),
        };
        let converted: core::TensorValue = tensor.to_core();
        assert_eq!(converted.dtype, core::Dtype::Other(42));
        let back: wire::TensorProto = converted.to_wire();
        assert_eq!(back.dtype, 42);
    }
}
