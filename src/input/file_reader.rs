use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::channel::{bounded, Receiver, Select, Sender};
use log::{debug, error, info};

use crate::component::{Component, StopFlag};
use crate::errors::PipelineError;
use crate::input::{RawMessage, MAX_LINE_LEN};

/// Reads one `RawMessage` per newline-terminated line from a file, closing
/// its output on EOF, and unblocks its own send immediately when told to
/// stop even if the downstream consumer is slow.
pub struct FileReader {
    path: PathBuf,
    output_tx: Option<Sender<RawMessage>>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    done_rx: Option<Receiver<()>>,
    stop_flag: Arc<StopFlag>,
    failed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>, output_tx: Sender<RawMessage>) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        Self {
            path: path.into(),
            output_tx: Some(output_tx),
            stop_tx,
            stop_rx,
            done_rx: None,
            stop_flag: Arc::new(StopFlag::new()),
            failed: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// True once the worker thread has exited because of an I/O error or an
    /// over-long line, rather than a clean EOF or an explicit `stop()`.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Reads lines until EOF, a stop signal, or a fatal error. Returns
    /// `false` for the fatal-error case so the caller can distinguish it
    /// from a clean shutdown.
    fn read_loop(path: PathBuf, output_tx: Sender<RawMessage>, stop_rx: Receiver<()>) -> bool {
        let origin = match std::fs::canonicalize(&path) {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        };
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("[FileReader] failed to open {}: {}", origin, e);
                return false;
            }
        };
        let mut reader = BufReader::new(file);

        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return true, // EOF
                Ok(_) => {}
                Err(e) => {
                    error!("[FileReader] error reading {}: {}", origin, e);
                    return false;
                }
            }
            if buf.len() > MAX_LINE_LEN {
                error!(
                    "[FileReader] line exceeds {}-byte limit in {}",
                    MAX_LINE_LEN, origin
                );
                return false;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let ingestion_ts_ns = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
            let msg = RawMessage::new(buf, origin.clone(), ingestion_ts_ns);

            let mut select = Select::new();
            let send_op = select.send(&output_tx);
            let stop_op = select.recv(&stop_rx);
            let selected = select.select();
            match selected.index() {
                i if i == send_op => {
                    if selected.send(&output_tx, msg).is_err() {
                        return true;
                    }
                }
                i if i == stop_op => {
                    let _ = selected.recv(&stop_rx);
                    return true;
                }
                _ => unreachable!(),
            }
        }
    }
}

impl Component for FileReader {
    fn start(&mut self) -> Result<(), PipelineError> {
        // Fail fast on an open error before any output has been emitted, so
        // no downstream state is ever left partially populated.
        std::fs::metadata(&self.path)?;

        let path = self.path.clone();
        let output_tx = self
            .output_tx
            .take()
            .expect("FileReader::start called twice");
        let stop_rx = self.stop_rx.clone();
        let stop_flag = self.stop_flag.clone();
        let failed = self.failed.clone();
        let (done_tx, done_rx) = bounded(1);
        self.done_rx = Some(done_rx);

        info!("[FileReader] starting on {}", path.display());
        self.handle = Some(thread::spawn(move || {
            let ok = Self::read_loop(path, output_tx, stop_rx);
            if !ok {
                failed.store(true, Ordering::Release);
            }
            // Reached on EOF, a stop signal, or an I/O error: the reader is
            // done either way, whether or not `stop()` was ever called.
            stop_flag.mark_stopped();
            let _ = done_tx.send(());
        }));
        Ok(())
    }

    fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        let _ = self.stop_tx.send(());
        if let Some(done_rx) = &self.done_rx {
            let _ = done_rx.recv();
        }
        debug!("[FileReader] stopped");
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

impl Drop for FileReader {
    fn drop(&mut self) {
        self.join();
    }
}
