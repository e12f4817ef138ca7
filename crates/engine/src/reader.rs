//! File readers
//!
//! A reader streams one file into a pipeline: an implicit `StreamStart`,
//! `Data` events sized by the chunk unit, then `StreamEnd(Ok)`. The file is
//! opened during bring-up so a bad path fails construction, not the stream.

use std::path::PathBuf;
use std::rc::Rc;

use sluice_event::{Buffer, EndError, Event};
use sluice_pipeline::{Context, Input, InputContext, PipelineLayout};
use tokio::io::AsyncReadExt;

use crate::bind::EngineError;

/// File-sourced pipeline entry point.
pub struct Reader {
    file: tokio::fs::File,
    path: PathBuf,
    chunk_size: usize,
    layout: Rc<PipelineLayout>,
}

impl Reader {
    /// Open the file and prepare the stream.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened - a reader never starts with an
    /// invalid source.
    pub async fn open(
        path: impl Into<PathBuf>,
        chunk_size: usize,
        layout: Rc<PipelineLayout>,
    ) -> Result<Self, EngineError> {
        let path = path.into();
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| EngineError::ReaderOpen {
                path: path.display().to_string(),
                source: e,
            })?;
        Ok(Self {
            file,
            path,
            chunk_size,
            layout,
        })
    }

    /// Stream the file through a fresh pipeline instance.
    pub async fn run(mut self) {
        tracing::info!(
            target: "reader",
            path = %self.path.display(),
            pipeline = %self.layout.name(),
            "reader starting"
        );

        let pipeline = self.layout.alloc(Context::new(), Input::null());
        InputContext::run(|| pipeline.input(Event::StreamStart));

        let mut total = 0u64;
        loop {
            let mut chunk = vec![0u8; self.chunk_size.max(1)];
            match self.file.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    chunk.truncate(n);
                    total += n as u64;
                    InputContext::run(|| pipeline.input(Event::Data(Buffer::from(chunk))));
                }
                Err(e) => {
                    tracing::warn!(
                        target: "reader",
                        path = %self.path.display(),
                        error = %e,
                        "read failed"
                    );
                    InputContext::run(|| pipeline.input(Event::StreamEnd(EndError::Unknown)));
                    return;
                }
            }
        }

        InputContext::run(|| pipeline.input(Event::StreamEnd(EndError::Ok)));
        tracing::info!(
            target: "reader",
            path = %self.path.display(),
            bytes = total,
            "reader finished"
        );
    }
}
