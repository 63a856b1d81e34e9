use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use tonic::{Request, Response, Status};

use runlog_core::types::{DataClass, Dtype, SummaryMetadata, TensorValue};
use runlog_ingest::logdir::LogdirLoader;
use runlog_ingest::run::{RunAccumulator, ValueDatum};
use runlog_proto::v1 as pb;
use runlog_proto::v1::data_provider_server::DataProvider;
use runlog_wire::ToWire;

use crate::blobkey::BlobKey;

/// Upper bound on one `ReadBlob` response frame.
const MAX_BLOB_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Serves the `DataProvider` RPC surface as a thin projection over a
/// [`LogdirLoader`]'s accumulator snapshots.
pub struct DataProviderService {
    loader: Arc<LogdirLoader>,
}

impl DataProviderService {
    pub fn new(loader: Arc<LogdirLoader>) -> Self {
        DataProviderService { loader }
    }

    /// Collects, per filtered run, the filtered time series of one data
    /// class with their metadata and current samples. Runs and tags come
    /// back in name order.
    async fn collect_series(
        &self,
        class: DataClass,
        plugin: &str,
        filters: &Filters,
    ) -> Vec<RunSeries> {
        let runs: BTreeMap<String, RunAccumulator> =
            self.loader.runs().await.into_iter().collect();
        let mut out = Vec::new();
        for (run, acc) in runs {
            if !matches(&filters.runs, &run) {
                continue;
            }
            let mut tags: Vec<(String, Option<Arc<SummaryMetadata>>)> =
                acc.list().await.into_iter().collect();
            tags.sort_by(|a, b| a.0.cmp(&b.0));

            let mut series = Vec::new();
            for (tag, metadata) in tags {
                let Some(metadata) = metadata else { continue };
                if metadata.data_class != class || metadata.plugin_name != plugin {
                    continue;
                }
                if !matches(&filters.tags, &tag) {
                    continue;
                }
                let sample = acc.sample(&tag).await;
                if sample.is_empty() {
                    // A listed tag always has data; don't panic if not.
                    continue;
                }
                series.push(TagSeries {
                    tag,
                    metadata,
                    sample,
                });
            }
            if !series.is_empty() {
                out.push(RunSeries { run, series });
            }
        }
        out
    }
}

struct RunSeries {
    run: String,
    series: Vec<TagSeries>,
}

struct TagSeries {
    tag: String,
    metadata: Arc<SummaryMetadata>,
    sample: Vec<ValueDatum>,
}

impl TagSeries {
    fn last(&self) -> &ValueDatum {
        // collect_series drops empty samples.
        &self.sample[self.sample.len() - 1]
    }
}

struct Filters {
    runs: Option<Vec<String>>,
    tags: Option<Vec<String>>,
}

fn filters(run_tag_filter: Option<pb::RunTagFilter>) -> Filters {
    let rtf = run_tag_filter.unwrap_or_default();
    Filters {
        runs: rtf.runs.map(|f| f.names),
        tags: rtf.tags.map(|f| f.names),
    }
}

/// An absent filter matches everything; a present one matches exactly its
/// entries.
fn matches(filter: &Option<Vec<String>>, name: &str) -> bool {
    match filter {
        None => true,
        Some(names) => names.iter().any(|n| n == name),
    }
}

fn plugin_name(filter: Option<pb::PluginFilter>) -> String {
    filter.map(|f| f.plugin_name).unwrap_or_default()
}

/// Converts an event-file wall time to a protobuf timestamp.
fn timestamp(wall_time: f64) -> prost_types::Timestamp {
    let mut seconds = wall_time.floor() as i64;
    let mut nanos = ((wall_time - wall_time.floor()) * 1e9).round() as i32;
    if nanos >= 1_000_000_000 {
        seconds += 1;
        nanos = 0;
    }
    prost_types::Timestamp { seconds, nanos }
}

/// Extracts the scalar data point from a tensor whose time series has the
/// scalar data class. Unsupported dtypes produce NaN.
fn scalar_value(tensor: &TensorValue) -> f64 {
    match tensor.dtype {
        Dtype::Float => {
            if let Some(&v) = tensor.float_val.first() {
                f64::from(v)
            } else if let Ok(bytes) =
                <[u8; 4]>::try_from(tensor.content.get(..4).unwrap_or_default())
            {
                f64::from(f32::from_le_bytes(bytes))
            } else {
                f64::NAN
            }
        }
        Dtype::Double => {
            if let Some(&v) = tensor.double_val.first() {
                v
            } else if let Ok(bytes) =
                <[u8; 8]>::try_from(tensor.content.get(..8).unwrap_or_default())
            {
                f64::from_le_bytes(bytes)
            } else {
                f64::NAN
            }
        }
        other => {
            tracing::debug!(dtype = ?other, "bad scalar dtype");
            f64::NAN
        }
    }
}

fn datum_scalar(datum: &ValueDatum) -> f64 {
    datum
        .tensor
        .as_ref()
        .map(scalar_value)
        .unwrap_or(f64::NAN)
}

fn blob_count(datum: &ValueDatum) -> usize {
    datum
        .tensor
        .as_ref()
        .map(|t| t.string_val.len())
        .unwrap_or_default()
}

#[tonic::async_trait]
impl DataProvider for DataProviderService {
    async fn list_runs(
        &self,
        _request: Request<pb::ListRunsRequest>,
    ) -> Result<Response<pb::ListRunsResponse>, Status> {
        let mut names: Vec<String> = self.loader.runs().await.into_keys().collect();
        names.sort_unstable();
        let runs = names
            .into_iter()
            .map(|name| pb::Run {
                id: name.clone(),
                name,
            })
            .collect();
        Ok(Response::new(pb::ListRunsResponse { runs }))
    }

    async fn list_scalars(
        &self,
        request: Request<pb::ListScalarsRequest>,
    ) -> Result<Response<pb::ListScalarsResponse>, Status> {
        let req = request.into_inner();
        let plugin = plugin_name(req.plugin_filter);
        let filters = filters(req.run_tag_filter);

        let runs = self
            .collect_series(DataClass::Scalar, &plugin, &filters)
            .await
            .into_iter()
            .map(|run| pb::list_scalars_response::RunEntry {
                run_name: run.run,
                tags: run
                    .series
                    .into_iter()
                    .map(|ts| {
                        let last = ts.last();
                        pb::list_scalars_response::TagEntry {
                            time_series: Some(pb::ScalarTimeSeries {
                                max_step: last.step.0,
                                max_wall_time: Some(timestamp(last.wall_time)),
                                summary_metadata: Some(ts.metadata.to_wire()),
                            }),
                            tag_name: ts.tag,
                        }
                    })
                    .collect(),
            })
            .collect();
        Ok(Response::new(pb::ListScalarsResponse { runs }))
    }

    async fn read_scalars(
        &self,
        request: Request<pb::ReadScalarsRequest>,
    ) -> Result<Response<pb::ReadScalarsResponse>, Status> {
        let req = request.into_inner();
        let plugin = plugin_name(req.plugin_filter);
        let filters = filters(req.run_tag_filter);

        let runs = self
            .collect_series(DataClass::Scalar, &plugin, &filters)
            .await
            .into_iter()
            .map(|run| pb::read_scalars_response::RunEntry {
                run_name: run.run,
                tags: run
                    .series
                    .into_iter()
                    .map(|ts| pb::read_scalars_response::TagEntry {
                        data: Some(pb::ScalarData {
                            step: ts.sample.iter().map(|d| d.step.0).collect(),
                            wall_time: ts
                                .sample
                                .iter()
                                .map(|d| timestamp(d.wall_time))
                                .collect(),
                            value: ts.sample.iter().map(datum_scalar).collect(),
                        }),
                        tag_name: ts.tag,
                    })
                    .collect(),
            })
            .collect();
        Ok(Response::new(pb::ReadScalarsResponse { runs }))
    }

    async fn list_tensors(
        &self,
        request: Request<pb::ListTensorsRequest>,
    ) -> Result<Response<pb::ListTensorsResponse>, Status> {
        let req = request.into_inner();
        let plugin = plugin_name(req.plugin_filter);
        let filters = filters(req.run_tag_filter);

        let runs = self
            .collect_series(DataClass::Tensor, &plugin, &filters)
            .await
            .into_iter()
            .map(|run| pb::list_tensors_response::RunEntry {
                run_name: run.run,
                tags: run
                    .series
                    .into_iter()
                    .map(|ts| {
                        let last = ts.last();
                        pb::list_tensors_response::TagEntry {
                            time_series: Some(pb::TensorTimeSeries {
                                max_step: last.step.0,
                                max_wall_time: Some(timestamp(last.wall_time)),
                                summary_metadata: Some(ts.metadata.to_wire()),
                            }),
                            tag_name: ts.tag,
                        }
                    })
                    .collect(),
            })
            .collect();
        Ok(Response::new(pb::ListTensorsResponse { runs }))
    }

    async fn read_tensors(
        &self,
        request: Request<pb::ReadTensorsRequest>,
    ) -> Result<Response<pb::ReadTensorsResponse>, Status> {
        let req = request.into_inner();
        let plugin = plugin_name(req.plugin_filter);
        let filters = filters(req.run_tag_filter);

        let runs = self
            .collect_series(DataClass::Tensor, &plugin, &filters)
            .await
            .into_iter()
            .map(|run| pb::read_tensors_response::RunEntry {
                run_name: run.run,
                tags: run
                    .series
                    .into_iter()
                    .map(|ts| pb::read_tensors_response::TagEntry {
                        data: Some(pb::TensorData {
                            step: ts.sample.iter().map(|d| d.step.0).collect(),
                            wall_time: ts
                                .sample
                                .iter()
                                .map(|d| timestamp(d.wall_time))
                                .collect(),
                            value: ts
                                .sample
                                .iter()
                                .filter_map(|d| d.tensor.as_ref())
                                .map(ToWire::to_wire)
                                .collect(),
                        }),
                        tag_name: ts.tag,
                    })
                    .collect(),
            })
            .collect();
        Ok(Response::new(pb::ReadTensorsResponse { runs }))
    }

    async fn list_blob_sequences(
        &self,
        request: Request<pb::ListBlobSequencesRequest>,
    ) -> Result<Response<pb::ListBlobSequencesResponse>, Status> {
        let req = request.into_inner();
        let plugin = plugin_name(req.plugin_filter);
        let filters = filters(req.run_tag_filter);

        let runs = self
            .collect_series(DataClass::BlobSequence, &plugin, &filters)
            .await
            .into_iter()
            .map(|run| pb::list_blob_sequences_response::RunEntry {
                run_name: run.run,
                tags: run
                    .series
                    .into_iter()
                    .map(|ts| {
                        let last = ts.last();
                        let max_length =
                            ts.sample.iter().map(blob_count).max().unwrap_or_default();
                        pb::list_blob_sequences_response::TagEntry {
                            time_series: Some(pb::BlobSequenceTimeSeries {
                                max_step: last.step.0,
                                max_wall_time: Some(timestamp(last.wall_time)),
                                max_length: max_length as i64,
                                summary_metadata: Some(ts.metadata.to_wire()),
                            }),
                            tag_name: ts.tag,
                        }
                    })
                    .collect(),
            })
            .collect();
        Ok(Response::new(pb::ListBlobSequencesResponse { runs }))
    }

    async fn read_blob_sequences(
        &self,
        request: Request<pb::ReadBlobSequencesRequest>,
    ) -> Result<Response<pb::ReadBlobSequencesResponse>, Status> {
        let req = request.into_inner();
        let plugin = plugin_name(req.plugin_filter);
        let filters = filters(req.run_tag_filter);
        let experiment_id = req.experiment_id;

        let runs = self
            .collect_series(DataClass::BlobSequence, &plugin, &filters)
            .await
            .into_iter()
            .map(|run| {
                let run_name = run.run;
                let tags = run
                    .series
                    .into_iter()
                    .map(|ts| {
                        let values = ts
                            .sample
                            .iter()
                            .map(|datum| pb::BlobSequenceEntry {
                                blobs: (0..blob_count(datum))
                                    .map(|index| pb::BlobReference {
                                        blob_key: BlobKey::new(
                                            &experiment_id,
                                            &run_name,
                                            &ts.tag,
                                            datum.step.0,
                                            index as i64,
                                        )
                                        .encode(),
                                    })
                                    .collect(),
                            })
                            .collect();
                        pb::read_blob_sequences_response::TagEntry {
                            data: Some(pb::BlobSequenceData {
                                step: ts.sample.iter().map(|d| d.step.0).collect(),
                                wall_time: ts
                                    .sample
                                    .iter()
                                    .map(|d| timestamp(d.wall_time))
                                    .collect(),
                                values,
                            }),
                            tag_name: ts.tag,
                        }
                    })
                    .collect();
                pb::read_blob_sequences_response::RunEntry { run_name, tags }
            })
            .collect();
        Ok(Response::new(pb::ReadBlobSequencesResponse { runs }))
    }

    type ReadBlobStream =
        Pin<Box<dyn Stream<Item = Result<pb::ReadBlobResponse, Status>> + Send + 'static>>;

    async fn read_blob(
        &self,
        request: Request<pb::ReadBlobRequest>,
    ) -> Result<Response<Self::ReadBlobStream>, Status> {
        let key = BlobKey::decode(&request.into_inner().blob_key)
            .map_err(|err| Status::invalid_argument(format!("bad blob key: {err}")))?;
        let run = String::from_utf8(key.run)
            .map_err(|_| Status::invalid_argument("blob key run is not UTF-8"))?;
        let tag = String::from_utf8(key.tag)
            .map_err(|_| Status::invalid_argument("blob key tag is not UTF-8"))?;

        let acc = self
            .loader
            .run(&run)
            .await
            .ok_or_else(|| Status::not_found(format!("no such run: {run:?}")))?;
        let sample = acc.sample(&tag).await;
        let datum = sample
            .iter()
            .find(|d| d.step.0 == key.step)
            .ok_or_else(|| {
                Status::not_found(format!(
                    "no data at step {} for run {run:?}, tag {tag:?}",
                    key.step
                ))
            })?;
        let index = usize::try_from(key.index)
            .map_err(|_| Status::invalid_argument("negative blob index"))?;
        let blob = datum
            .tensor
            .as_ref()
            .and_then(|tensor| tensor.string_val.get(index))
            .ok_or_else(|| Status::not_found(format!("blob index {index} out of range")))?
            .clone();

        let frames: Vec<Result<pb::ReadBlobResponse, Status>> = blob
            .chunks(MAX_BLOB_CHUNK_BYTES)
            .map(|chunk| Ok(pb::ReadBlobResponse {
                data: chunk.to_vec(),
            }))
            .collect();
        Ok(Response::new(Box::pin(tokio_stream::iter(frames))))
    }
}
