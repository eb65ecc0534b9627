//! Log processor: wraps an injected transform and turns `RawMessage`s into
//! `ProcessedLog`s, dropping anything the transform rejects.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};
use log::{debug, info};

use crate::component::{Component, StopFlag};
use crate::errors::PipelineError;
use crate::input::RawMessage;
use crate::logs::ProcessedLog;

pub type Transform = dyn Fn(&RawMessage) -> Result<Option<ProcessedLog>, PipelineError> + Send + Sync;

pub struct LogProcessor {
    input_rx: Option<Receiver<RawMessage>>,
    output_tx: Option<Sender<ProcessedLog>>,
    transform: Arc<Transform>,
    stop_flag: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

impl LogProcessor {
    pub fn new(
        input_rx: Receiver<RawMessage>,
        output_tx: Sender<ProcessedLog>,
        transform: Arc<Transform>,
    ) -> Self {
        Self {
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            transform,
            stop_flag: Arc::new(StopFlag::new()),
            handle: None,
        }
    }
}

impl Component for LogProcessor {
    fn start(&mut self) -> Result<(), PipelineError> {
        let input_rx = self.input_rx.take().expect("LogProcessor::start called twice");
        let output_tx = self.output_tx.take().expect("LogProcessor::start called twice");
        let transform = self.transform.clone();
        let stop_flag = self.stop_flag.clone();

        info!("[LogProcessor] starting");
        self.handle = Some(thread::spawn(move || {
            for raw in input_rx.iter() {
                match transform(&raw) {
                    Ok(Some(log)) => {
                        if output_tx.send(log).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("[LogProcessor] dropped line from {}: filtered by transform", raw.origin);
                    }
                    Err(e) => {
                        debug!("[LogProcessor] dropped line from {}: {}", raw.origin, e);
                    }
                }
            }
            stop_flag.mark_stopped();
        }));
        Ok(())
    }

    fn stop(&self) {
        // Input closure (owned upstream by the reader) drains the loop; this
        // stage has no stop signal of its own to send.
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag.is_stopped()
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogProcessor {
    fn drop(&mut self) {
        self.join();
    }
}
