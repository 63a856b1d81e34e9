use std::collections::HashMap;
use std::sync::Arc;

use runlog_core::types::{
    DataClass, Event, EventPayload, SummaryMetadata, SummaryPayload, SummaryValue, TensorValue,
};

/// The initial summary metadata seen for each tag within a single run. The
/// first metadata observed for a tag wins, even if it is absent; later
/// writes for the same tag are ignored.
pub type MetadataStore = HashMap<String, Option<Arc<SummaryMetadata>>>;

/// Tag under which run-level graphs are exposed. Must agree with the
/// front-end graph dashboard.
pub const RUN_GRAPH_TAG: &str = "__run_graph__";

pub const GRAPHS_PLUGIN_NAME: &str = "graphs";
pub const IMAGES_PLUGIN_NAME: &str = "images";
pub const SCALARS_PLUGIN_NAME: &str = "scalars";

/// A summary value after compatibility rewriting. `metadata` is set only
/// when this value is the first sighting of its tag (the store keeps the
/// authoritative copy); `tensor` is absent for summary shapes that were not
/// rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedValue {
    pub tag: String,
    pub metadata: Option<Arc<SummaryMetadata>>,
    pub tensor: Option<TensorValue>,
}

/// Converts an on-disk event to the values it represents, rewriting legacy
/// summary shapes into the uniform tensor model. Updates `mds` with any new
/// summary metadata and reads it to decide how to transform tensor data.
pub fn event_values(event: &Event, mds: &mut MetadataStore) -> Vec<MigratedValue> {
    match &event.payload {
        EventPayload::GraphDef(graph) => vec![migrate_graph_def(graph, mds)],
        EventPayload::Summary(values) => {
            values.iter().map(|v| migrate_value(v, mds)).collect()
        }
        EventPayload::Other => Vec::new(),
    }
}

fn migrate_graph_def(graph: &[u8], mds: &mut MetadataStore) -> MigratedValue {
    let tensor = TensorValue::string_vector(vec![graph.to_vec()]);
    let metadata = if mds.contains_key(RUN_GRAPH_TAG) {
        None
    } else {
        let meta = Arc::new(SummaryMetadata {
            plugin_name: GRAPHS_PLUGIN_NAME.to_string(),
            plugin_content: Vec::new(),
            data_class: DataClass::BlobSequence,
        });
        mds.insert(RUN_GRAPH_TAG.to_string(), Some(meta.clone()));
        Some(meta)
    };
    MigratedValue {
        tag: RUN_GRAPH_TAG.to_string(),
        metadata,
        tensor: Some(tensor),
    }
}

fn migrate_value(value: &SummaryValue, mds: &mut MetadataStore) -> MigratedValue {
    let had_meta = mds.contains_key(&value.tag);
    let (tensor, fresh_meta) = match &value.payload {
        SummaryPayload::SimpleValue(v) => {
            let meta = (!had_meta).then(|| SummaryMetadata {
                plugin_name: SCALARS_PLUGIN_NAME.to_string(),
                plugin_content: Vec::new(),
                data_class: DataClass::Scalar,
            });
            (Some(TensorValue::scalar_f32(*v)), meta)
        }
        SummaryPayload::Image(image) => {
            let tensor = TensorValue::string_vector(vec![
                image.width.to_string().into_bytes(),
                image.height.to_string().into_bytes(),
                image.data.clone(),
            ]);
            let meta = (!had_meta).then(|| SummaryMetadata {
                plugin_name: IMAGES_PLUGIN_NAME.to_string(),
                plugin_content: Vec::new(),
                data_class: DataClass::BlobSequence,
            });
            (Some(tensor), meta)
        }
        SummaryPayload::Tensor(tensor) => {
            // Tensors pass through unchanged; legacy write paths omit the
            // data class, so infer it from the owning plugin.
            let meta = if had_meta {
                None
            } else {
                value.metadata.clone().map(|mut meta| {
                    match meta.plugin_name.as_str() {
                        SCALARS_PLUGIN_NAME => meta.data_class = DataClass::Scalar,
                        IMAGES_PLUGIN_NAME => meta.data_class = DataClass::BlobSequence,
                        _ => {}
                    }
                    meta
                })
            };
            (Some(tensor.clone()), meta)
        }
        SummaryPayload::Other => {
            let meta = if had_meta {
                None
            } else {
                value.metadata.clone()
            };
            (None, meta)
        }
    };

    let metadata = fresh_meta.map(Arc::new);
    if !had_meta {
        mds.insert(value.tag.clone(), metadata.clone());
    }
    MigratedValue {
        tag: value.tag.clone(),
        metadata,
        tensor,
    }
}

#[cfg(test)]
mod tests {
    use runlog_core::types::{Dtype, ImageValue, Step};

    use super::*;

    fn summary_event(step: i64, wall_time: f64, values: Vec<SummaryValue>) -> Event {
        Event {
            step: Step(step),
            wall_time,
            payload: EventPayload::Summary(values),
        }
    }

    fn simple_value(tag: &str, v: f32) -> SummaryValue {
        SummaryValue {
            tag: tag.to_string(),
            metadata: None,
            payload: SummaryPayload::SimpleValue(v),
        }
    }

    #[test]
    fn legacy_scalar_becomes_rank_zero_tensor() {
        let mut mds = MetadataStore::new();
        let first = event_values(
            &summary_event(0, 1000.25, vec![simple_value("accuracy", 1.0)]),
            &mut mds,
        );
        assert_eq!(first.len(), 1);
        let value = &first[0];
        assert_eq!(value.tag, "accuracy");
        let tensor = value.tensor.as_ref().unwrap();
        assert_eq!(tensor.dtype, Dtype::Float);
        assert!(tensor.shape.is_empty());
        assert_eq!(tensor.float_val, vec![1.0]);

        let meta = value.metadata.as_ref().unwrap();
        assert_eq!(meta.plugin_name, SCALARS_PLUGIN_NAME);
        assert_eq!(meta.data_class, DataClass::Scalar);
        assert_eq!(mds.get("accuracy").cloned().flatten(), Some(meta.clone()));

        // The second event's value carries no metadata of its own: the
        // store keeps the authoritative copy.
        let second = event_values(
            &summary_event(1, 1234.5, vec![simple_value("accuracy", 7.0)]),
            &mut mds,
        );
        assert_eq!(second.len(), 1);
        assert!(second[0].metadata.is_none());
        assert_eq!(
            second[0].tensor.as_ref().unwrap().float_val,
            vec![7.0]
        );
    }

    #[test]
    fn tensor_with_scalars_plugin_infers_data_class() {
        let mut mds = MetadataStore::new();
        let value = SummaryValue {
            tag: "accuracy".to_string(),
            metadata: Some(SummaryMetadata {
                plugin_name: SCALARS_PLUGIN_NAME.to_string(),
                plugin_content: Vec::new(),
                // Legacy write paths omit the data class.
                data_class: DataClass::Unknown,
            }),
            payload: SummaryPayload::Tensor(TensorValue {
                dtype: Dtype::Float,
                content: b"\x00\x00\x80\x3f".to_vec(),
                ..TensorValue::default()
            }),
        };
        let out = event_values(&summary_event(0, 1000.25, vec![value]), &mut mds);
        let meta = out[0].metadata.as_ref().unwrap();
        assert_eq!(meta.data_class, DataClass::Scalar);
        assert_eq!(
            out[0].tensor.as_ref().unwrap().content,
            b"\x00\x00\x80\x3f".to_vec()
        );

        // A tensor value with no metadata for an already-seen tag emits none
        // and leaves the store untouched.
        let value = SummaryValue {
            tag: "accuracy".to_string(),
            metadata: None,
            payload: SummaryPayload::Tensor(TensorValue {
                dtype: Dtype::Float,
                content: b"\x00\x00\xe0\x40".to_vec(),
                ..TensorValue::default()
            }),
        };
        let out = event_values(&summary_event(1, 1234.5, vec![value]), &mut mds);
        assert!(out[0].metadata.is_none());
        assert_eq!(
            mds.get("accuracy").cloned().flatten().unwrap().data_class,
            DataClass::Scalar
        );
    }

    #[test]
    fn graph_def_gets_reserved_tag() {
        let mut mds = MetadataStore::new();
        let event = Event {
            step: Step(0),
            wall_time: 1000.25,
            payload: EventPayload::GraphDef(b"my graph".to_vec()),
        };
        let out = event_values(&event, &mut mds);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag, RUN_GRAPH_TAG);

        let tensor = out[0].tensor.as_ref().unwrap();
        assert_eq!(tensor.dtype, Dtype::String);
        assert_eq!(tensor.shape, vec![1]);
        assert_eq!(tensor.string_val, vec![b"my graph".to_vec()]);

        let meta = out[0].metadata.as_ref().unwrap();
        assert_eq!(meta.plugin_name, GRAPHS_PLUGIN_NAME);
        assert_eq!(meta.data_class, DataClass::BlobSequence);

        // A second graph for the same run emits no fresh metadata.
        let out = event_values(&event, &mut mds);
        assert!(out[0].metadata.is_none());
    }

    #[test]
    fn image_becomes_string_triple() {
        let mut mds = MetadataStore::new();
        let value = SummaryValue {
            tag: "samples".to_string(),
            metadata: None,
            payload: SummaryPayload::Image(ImageValue {
                width: 28,
                height: 14,
                data: b"PNGDATA".to_vec(),
            }),
        };
        let out = event_values(&summary_event(0, 1.0, vec![value]), &mut mds);
        let tensor = out[0].tensor.as_ref().unwrap();
        assert_eq!(tensor.shape, vec![3]);
        assert_eq!(
            tensor.string_val,
            vec![b"28".to_vec(), b"14".to_vec(), b"PNGDATA".to_vec()]
        );
        let meta = out[0].metadata.as_ref().unwrap();
        assert_eq!(meta.plugin_name, IMAGES_PLUGIN_NAME);
        assert_eq!(meta.data_class, DataClass::BlobSequence);
    }

    #[test]
    fn first_metadata_wins() {
        let mut mds = MetadataStore::new();
        event_values(
            &summary_event(0, 1.0, vec![simple_value("loss", 0.5)]),
            &mut mds,
        );
        let stored = mds.get("loss").cloned().flatten().unwrap();

        // A later tensor value carrying different metadata does not displace
        // the stored copy.
        let value = SummaryValue {
            tag: "loss".to_string(),
            metadata: Some(SummaryMetadata {
                plugin_name: "histograms".to_string(),
                plugin_content: Vec::new(),
                data_class: DataClass::Tensor,
            }),
            payload: SummaryPayload::Tensor(TensorValue::scalar_f32(0.25)),
        };
        event_values(&summary_event(1, 2.0, vec![value]), &mut mds);
        assert_eq!(mds.get("loss").cloned().flatten().unwrap(), stored);
    }

    #[test]
    fn unhandled_payloads_produce_no_tensor() {
        let mut mds = MetadataStore::new();
        let value = SummaryValue {
            tag: "audio".to_string(),
            metadata: None,
            payload: SummaryPayload::Other,
        };
        let out = event_values(&summary_event(0, 1.0, vec![value]), &mut mds);
        assert_eq!(out.len(), 1);
        assert!(out[0].tensor.is_none());
        // The tag is remembered as metadata-less.
        assert_eq!(mds.get("audio"), Some(&None));
    }
}
