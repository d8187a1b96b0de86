//! Token-classification output to entity spans.

use super::extractor::RecognizedSpan;

#[cfg(feature = "onnx-ner")]
pub use onnx::OnnxRecognizer;

/// Map a model label onto the names used elsewhere (`PER` becomes `PERSON`).
#[must_use]
pub fn normalize_label(label: &str) -> &str {
    match label {
        "PER" => "PERSON",
        other => other,
    }
}

/// Merge per-token BIO tags into spans.
///
/// Each token carries its tag and byte offsets into `text`. Tokens with an
/// empty range (special tokens) end the current span. An `I-` tag, or any tag
/// of the same label on a token that touches the previous one, extends the
/// current span.
#[must_use]
pub fn merge_bio<'a, I>(text: &str, tokens: I) -> Vec<RecognizedSpan>
where
    I: IntoIterator<Item = (&'a str, usize, usize)>,
{
    let mut spans = Vec::new();
    let mut current: Option<(&str, usize, usize)> = None;

    let mut flush = |current: &mut Option<(&str, usize, usize)>| {
        if let Some((label, start, end)) = current.take() {
            if let Some(slice) = text.get(start..end) {
                spans.push(RecognizedSpan::new(normalize_label(label), slice, start, end));
            }
        }
    };

    for (tag, start, end) in tokens {
        if start >= end {
            flush(&mut current);
            continue;
        }

        let Some((prefix, label)) = tag.split_once('-') else {
            flush(&mut current);
            continue;
        };

        let extends = match current {
            Some((open, _, open_end)) => open == label && (prefix == "I" || start == open_end),
            None => false,
        };

        if extends {
            if let Some(open) = current.as_mut() {
                open.2 = end;
            }
        } else {
            flush(&mut current);
            if prefix == "B" || prefix == "I" {
                current = Some((label, start, end));
            }
        }
    }
    flush(&mut current);

    spans
}

#[cfg(feature = "onnx-ner")]
mod onnx {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use ort::session::Session;
    use serde::Deserialize;

    use super::merge_bio;
    use crate::ingest::extractor::{EntityError, EntityRecognizer, EntityResult, RecognizedSpan};

    #[derive(Deserialize)]
    struct ModelConfig {
        id2label: HashMap<String, String>,
    }

    struct Model {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
        labels: Vec<String>,
    }

    /// BERT-style token classifier exported to ONNX.
    ///
    /// The model directory holds `model.onnx`, `tokenizer.json`, and the
    /// `config.json` whose `id2label` names the output classes.
    pub struct OnnxRecognizer {
        model: Arc<Model>,
    }

    impl OnnxRecognizer {
        pub fn load(model_dir: &Path) -> EntityResult<Self> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");
            let config_path = model_dir.join("config.json");

            for path in [&model_path, &tokenizer_path, &config_path] {
                if !path.exists() {
                    return Err(EntityError::ModelUnavailable(format!(
                        "missing {}",
                        path.display()
                    )));
                }
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| EntityError::ModelUnavailable(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| EntityError::ModelUnavailable(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| {
                    EntityError::ModelUnavailable(format!("ONNX load failed: {e}"))
                })?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
                EntityError::ModelUnavailable(format!("Tokenizer load failed: {e}"))
            })?;

            let config: ModelConfig = std::fs::read(&config_path)
                .map_err(|e| EntityError::ModelUnavailable(e.to_string()))
                .and_then(|raw| {
                    serde_json::from_slice(&raw)
                        .map_err(|e| EntityError::ModelUnavailable(format!("config.json: {e}")))
                })?;

            let mut labels = vec![String::from("O"); config.id2label.len()];
            for (id, label) in config.id2label {
                let index: usize = id
                    .parse()
                    .map_err(|_| EntityError::ModelUnavailable(format!("bad label id {id}")))?;
                if let Some(slot) = labels.get_mut(index) {
                    *slot = label;
                }
            }

            tracing::info!(
                model = %model_dir.display(),
                labels = labels.len(),
                "ONNX recognizer loaded"
            );

            Ok(Self {
                model: Arc::new(Model {
                    session: Mutex::new(session),
                    tokenizer,
                    labels,
                }),
            })
        }
    }

    impl Model {
        fn infer(&self, text: &str) -> EntityResult<Vec<RecognizedSpan>> {
            use ort::value::TensorRef;

            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| EntityError::Failed(e.to_string()))?;

            let seq_len = encoding.get_ids().len();
            let widen = |v: &[u32]| v.iter().map(|&x| i64::from(x)).collect::<Vec<_>>();

            let array = |values: Vec<i64>| {
                ndarray::Array2::from_shape_vec((1, seq_len), values)
                    .map_err(|e| EntityError::Failed(e.to_string()))
            };
            let ids = array(widen(encoding.get_ids()))?;
            let mask = array(widen(encoding.get_attention_mask()))?;
            let types = array(widen(encoding.get_type_ids()))?;

            let ids_tensor =
                TensorRef::from_array_view(&ids).map_err(|e| EntityError::Failed(e.to_string()))?;
            let mask_tensor =
                TensorRef::from_array_view(&mask).map_err(|e| EntityError::Failed(e.to_string()))?;
            let type_tensor = TensorRef::from_array_view(&types)
                .map_err(|e| EntityError::Failed(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| EntityError::Failed("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| EntityError::Failed(format!("ONNX inference failed: {e}")))?;

            // [1, seq_len, num_labels]
            let (shape, logits) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EntityError::Failed(format!("Output extraction: {e}")))?;

            let classes = self.labels.len();
            if classes == 0 || shape.len() != 3 || usize::try_from(shape[2]).ok() != Some(classes) {
                return Err(EntityError::Failed(format!(
                    "Unexpected output shape: {shape:?}, expected [1, {seq_len}, {classes}]"
                )));
            }

            let tags: Vec<&str> = logits
                .chunks(classes)
                .take(seq_len)
                .map(|row| {
                    let best = row
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map_or(0, |(i, _)| i);
                    self.labels[best].as_str()
                })
                .collect();

            let tokens = tags
                .iter()
                .zip(encoding.get_offsets())
                .map(|(tag, &(start, end))| (*tag, start, end));

            Ok(merge_bio(text, tokens))
        }
    }

    #[async_trait::async_trait]
    impl EntityRecognizer for OnnxRecognizer {
        fn name(&self) -> &str {
            "onnx"
        }

        async fn recognize(&self, text: &str) -> EntityResult<Vec<RecognizedSpan>> {
            let model = Arc::clone(&self.model);
            let text = text.to_string();

            tokio::task::spawn_blocking(move || model.infer(&text))
                .await
                .map_err(|e| EntityError::Failed(format!("inference task: {e}")))?
        }
    }
}
