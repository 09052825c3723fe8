//! Socket backed row channels for hops crossing host boundaries.
//!
//! A remote output drains a local row channel filled by the producing worker
//! and streams it to a single connected peer. A remote input connects to the
//! peer and fills a local row channel read by the consuming worker. From the
//! worker's point of view both sides are plain row channels.
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use rowpipe_error::{ErrorKind, OptionExt, RowpipeError, Result};
use tracing::{Span, debug, info, trace, warn};

use super::codec::{Frame, read_frame, write_frame};
use super::ports::PortPool;
use crate::channel::RowChannel;
use crate::config::PipelineConfig;
use crate::graph::RemoteEdge;
use crate::pipeline::control::PipelineControl;
use crate::row::{Row, RowLayout};

/// Interval between accept polls and connect retries.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn io_error(msg: &'static str, err: io::Error, edge: &RemoteEdge) -> RowpipeError {
    RowpipeError::with_source(msg, Box::new(err))
        .with_kind(ErrorKind::ChannelIo)
        .with_field("edge", edge)
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    push: Duration,
    pop: Duration,
    connect: Duration,
    accept: Duration,
}

impl Timeouts {
    fn from_config(config: &PipelineConfig) -> Self {
        Timeouts {
            push: config.push_timeout(),
            pop: config.pop_timeout(),
            connect: config.remote_connect_timeout(),
            accept: config.remote_accept_timeout(),
        }
    }
}

/// Server side of a remote hop.
#[derive(Debug)]
pub struct RemoteOutput {
    edge: RemoteEdge,
    channel: Arc<RowChannel>,
    listener: Option<TcpListener>,
    port: u16,
    pool: Arc<PortPool>,
    handle: Option<JoinHandle<()>>,
    released: bool,
}

impl RemoteOutput {
    /// Bind the server socket for `edge` and reserve its port.
    ///
    /// Binding to port 0 picks any free port, see `local_port`.
    pub fn bind(edge: RemoteEdge, channel: Arc<RowChannel>, pool: Arc<PortPool>) -> Result<Self> {
        let listener = TcpListener::bind((edge.hostname.as_str(), edge.port))
            .map_err(|e| io_error("Failed to bind remote output socket", e, &edge))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| io_error("Failed to configure remote output socket", e, &edge))?;
        let port = listener
            .local_addr()
            .map_err(|e| io_error("Failed to get remote output address", e, &edge))?
            .port();

        pool.reserve(port)?;
        info!(%edge, port, "remote output listening");

        Ok(RemoteOutput {
            edge,
            channel,
            listener: Some(listener),
            port,
            pool,
            handle: None,
            released: false,
        })
    }

    pub fn edge(&self) -> &RemoteEdge {
        &self.edge
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn channel(&self) -> &Arc<RowChannel> {
        &self.channel
    }

    /// Start streaming rows to the peer once it connects.
    pub fn start(&mut self, control: Arc<PipelineControl>, config: &PipelineConfig) -> Result<()> {
        let listener = self
            .listener
            .take()
            .required("remote output listener")?;
        let channel = self.channel.clone();
        let edge = self.edge.clone();
        let timeouts = Timeouts::from_config(config);
        let span = Span::current();

        let handle = thread::Builder::new()
            .name(format!("rowpipe-out-{}.{}", edge.source_stage, edge.source_copy))
            .spawn(move || {
                let _guard = span.enter();
                if let Err(err) = serve(&listener, &channel, &control, &edge, timeouts) {
                    if control.is_stopped() {
                        debug!(%err, "remote output ended after stop");
                    } else {
                        control.set_error(err);
                    }
                }
            })
            .map_err(|e| io_error("Failed to spawn remote output thread", e, &self.edge))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the streaming thread and return the port to the pool.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(edge = %self.edge, "remote output thread panicked");
            }
        }
        self.listener = None;
        if !self.released {
            self.pool.release(self.port);
            self.released = true;
            debug!(edge = %self.edge, port = self.port, "remote output closed");
        }
    }
}

impl Drop for RemoteOutput {
    fn drop(&mut self) {
        if !self.released {
            self.pool.release(self.port);
        }
    }
}

fn accept(
    listener: &TcpListener,
    control: &PipelineControl,
    edge: &RemoteEdge,
    timeout: Duration,
) -> Result<Option<TcpStream>> {
    let start = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%edge, %addr, "remote input connected");
                return Ok(Some(stream));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if control.is_stopped() {
                    return Ok(None);
                }
                if start.elapsed() >= timeout {
                    return Err(RowpipeError::new("Timed out waiting for remote input to connect")
                        .with_kind(ErrorKind::ChannelIo)
                        .with_field("edge", edge)
                        .with_field("timeout_ms", timeout.as_millis()));
                }
                thread::sleep(SOCKET_POLL_INTERVAL);
            }
            Err(e) => return Err(io_error("Failed to accept remote input", e, edge)),
        }
    }
}

fn serve(
    listener: &TcpListener,
    channel: &RowChannel,
    control: &PipelineControl,
    edge: &RemoteEdge,
    timeouts: Timeouts,
) -> Result<()> {
    let Some(stream) = accept(listener, control, edge, timeouts.accept)? else {
        return Ok(());
    };
    stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_nodelay(true))
        .map_err(|e| io_error("Failed to configure remote connection", e, edge))?;

    let mut writer = BufWriter::new(stream);
    let mut scratch = BytesMut::new();
    let mut layout: Option<Arc<RowLayout>> = None;
    let mut sent = 0u64;

    loop {
        match channel.pop_wait(timeouts.pop) {
            Some(row) => {
                let changed = match &layout {
                    Some(current) => !Arc::ptr_eq(current, row.layout()) && current != row.layout(),
                    None => true,
                };
                if changed {
                    let next = row.layout().clone();
                    write_frame(&mut writer, &Frame::Layout(next.as_ref().clone()), &mut scratch)?;
                    layout = Some(next);
                }
                let (_, values) = row.into_parts();
                write_frame(&mut writer, &Frame::Row(values), &mut scratch)?;
                sent += 1;
            }
            None => {
                if channel.is_drained() || (control.is_stopped() && channel.size() == 0) {
                    break;
                }
                writer
                    .flush()
                    .map_err(|e| io_error("Failed to write to remote input", e, edge))?;
            }
        }
    }

    write_frame(&mut writer, &Frame::End, &mut scratch)?;
    writer
        .flush()
        .map_err(|e| io_error("Failed to write to remote input", e, edge))?;

    debug!(%edge, sent, "remote output finished");
    Ok(())
}

/// Client side of a remote hop.
#[derive(Debug)]
pub struct RemoteInput {
    edge: RemoteEdge,
    channel: Arc<RowChannel>,
    /// Clone of the connected socket, used to unblock the reader on teardown.
    socket: Arc<Mutex<Option<TcpStream>>>,
    handle: Option<JoinHandle<()>>,
}

impl RemoteInput {
    pub fn new(edge: RemoteEdge, channel: Arc<RowChannel>) -> Self {
        RemoteInput {
            edge,
            channel,
            socket: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    pub fn edge(&self) -> &RemoteEdge {
        &self.edge
    }

    pub fn channel(&self) -> &Arc<RowChannel> {
        &self.channel
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Connect to the peer and start filling the local channel.
    ///
    /// The channel is marked done once the peer sends end of stream, or on
    /// any failure.
    pub fn start(&mut self, control: Arc<PipelineControl>, config: &PipelineConfig) -> Result<()> {
        let channel = self.channel.clone();
        let edge = self.edge.clone();
        let socket = self.socket.clone();
        let timeouts = Timeouts::from_config(config);
        let span = Span::current();

        let handle = thread::Builder::new()
            .name(format!("rowpipe-in-{}.{}", edge.target_stage, edge.target_copy))
            .spawn(move || {
                let _guard = span.enter();
                let result = receive(&channel, &control, &edge, &socket, timeouts);
                channel.mark_done();
                if let Err(err) = result {
                    if control.is_stopped() {
                        debug!(%err, "remote input ended after stop");
                    } else {
                        control.set_error(err);
                    }
                }
            })
            .map_err(|e| io_error("Failed to spawn remote input thread", e, &self.edge))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the reader thread.
    ///
    /// If `abort` is set the socket is shut down first so a blocked read
    /// returns.
    pub fn close(&mut self, abort: bool) {
        if abort {
            if let Some(socket) = self.socket.lock().as_ref() {
                let _ = socket.shutdown(Shutdown::Both);
            }
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(edge = %self.edge, "remote input thread panicked");
            }
        }
        self.socket.lock().take();
    }
}

fn connect(control: &PipelineControl, edge: &RemoteEdge, timeout: Duration) -> Result<Option<TcpStream>> {
    let start = Instant::now();
    loop {
        match TcpStream::connect((edge.hostname.as_str(), edge.port)) {
            Ok(stream) => {
                debug!(%edge, "connected to remote output");
                return Ok(Some(stream));
            }
            Err(e) => {
                if control.is_stopped() {
                    return Ok(None);
                }
                if start.elapsed() >= timeout {
                    return Err(io_error("Failed to connect to remote output", e, edge)
                        .with_field("timeout_ms", timeout.as_millis()));
                }
                trace!(%edge, %e, "retrying remote connect");
                thread::sleep(SOCKET_POLL_INTERVAL);
            }
        }
    }
}

fn receive(
    channel: &RowChannel,
    control: &PipelineControl,
    edge: &RemoteEdge,
    socket: &Mutex<Option<TcpStream>>,
    timeouts: Timeouts,
) -> Result<()> {
    let Some(stream) = connect(control, edge, timeouts.connect)? else {
        return Ok(());
    };
    let clone = stream
        .try_clone()
        .map_err(|e| io_error("Failed to clone remote connection", e, edge))?;
    *socket.lock() = Some(clone);

    let mut reader = BufReader::new(stream);
    let mut layout: Option<Arc<RowLayout>> = None;
    let mut received = 0u64;

    loop {
        let frame = read_frame(&mut reader).map_err(|e| e.with_field("edge", edge))?;
        match frame {
            Some(Frame::Layout(next)) => layout = Some(Arc::new(next)),
            Some(Frame::Row(values)) => {
                let layout = layout.clone().ok_or_else(|| {
                    RowpipeError::new("Received row before row layout")
                        .with_kind(ErrorKind::ChannelIo)
                        .with_field("edge", edge)
                })?;
                let mut row = Row::try_new(layout, values)?;
                loop {
                    match channel.push_wait(row, timeouts.push) {
                        Ok(()) => break,
                        Err(rejected) => {
                            if control.is_stopped() {
                                return Ok(());
                            }
                            row = rejected;
                        }
                    }
                }
                received += 1;
            }
            Some(Frame::End) => {
                debug!(%edge, received, "remote input finished");
                return Ok(());
            }
            None => {
                return Err(RowpipeError::new("Remote output closed the connection before end of stream")
                    .with_kind(ErrorKind::ChannelIo)
                    .with_field("edge", edge)
                    .with_field("received", received));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::graph::StageCopyId;
    use crate::row::{DataType, Field, Value};

    fn edge(port: u16) -> RemoteEdge {
        RemoteEdge {
            source_slave: "master".to_string(),
            source_stage: "a".to_string(),
            source_copy: 0,
            target_slave: "slave1".to_string(),
            target_stage: "b".to_string(),
            target_copy: 0,
            hostname: "127.0.0.1".to_string(),
            port,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            remote_connect_timeout_ms: 5_000,
            remote_accept_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    #[test]
    fn rows_arrive_in_order_then_done() {
        let control = Arc::new(PipelineControl::new(Uuid::new_v4()));
        let pool = Arc::new(PortPool::new());

        let out_channel = Arc::new(
            RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", 0), 100)
                .with_remote_slave("slave1"),
        );
        let mut output = RemoteOutput::bind(edge(0), out_channel.clone(), pool.clone()).unwrap();
        let port = output.local_port();
        assert!(pool.is_reserved(port));
        output.start(control.clone(), &config()).unwrap();

        let in_channel = Arc::new(
            RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", 0), 100)
                .with_remote_slave("master"),
        );
        let mut input = RemoteInput::new(edge(port), in_channel.clone());
        input.start(control.clone(), &config()).unwrap();

        let layout = Arc::new(RowLayout::new([
            Field::new("id", DataType::Integer),
            Field::new("name", DataType::String),
        ]));
        for i in 0..50 {
            let row = Row::try_new(layout.clone(), vec![Value::Integer(i), Value::from(format!("r{i}"))]).unwrap();
            out_channel.push_wait(row, Duration::from_secs(5)).unwrap();
        }
        out_channel.mark_done();

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !in_channel.is_drained() && Instant::now() < deadline {
            if let Some(row) = in_channel.pop_wait(Duration::from_millis(10)) {
                got.push(row);
            }
        }

        output.close();
        input.close(false);

        assert_eq!(50, got.len());
        for (i, row) in got.iter().enumerate() {
            assert_eq!(layout.as_ref(), row.layout().as_ref());
            assert_eq!(Some(&Value::Integer(i as i64)), row.value(0));
        }
        assert!(in_channel.is_done());
        assert!(!pool.is_reserved(port));
        assert!(!control.has_error());
    }

    #[test]
    fn port_in_use_is_rejected() {
        let pool = Arc::new(PortPool::new());
        let channel = Arc::new(RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", 0), 10));

        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        pool.reserve(port).unwrap();

        let err = RemoteOutput::bind(edge(port), channel, pool.clone()).unwrap_err();
        assert_eq!(ErrorKind::ChannelIo, err.kind());
        assert!(pool.is_reserved(port));
    }

    #[test]
    fn stop_while_waiting_for_peer() {
        let control = Arc::new(PipelineControl::new(Uuid::new_v4()));
        let pool = Arc::new(PortPool::new());
        let channel = Arc::new(RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", 0), 10));

        let mut output = RemoteOutput::bind(edge(0), channel, pool).unwrap();
        output.start(control.clone(), &config()).unwrap();

        control.stop_all();
        output.close();
        assert!(!control.has_error());
    }
}
