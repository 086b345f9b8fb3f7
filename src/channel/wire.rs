use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::channel::config::HubConfig;
use crate::transport::errors::{ChannelError, JoinError};
use crate::transport::types::{Note, RoomSettings, Student, Teacher};
#[cfg(not(feature = "coverage"))]
use openssl::ssl::{SslConnector, SslMethod};
#[cfg(not(feature = "coverage"))]
use std::net::TcpStream;

/// Outbound event vocabulary. Requests carrying an acknowledgement id are
/// answered by the hub with an [`HubFrame::Ack`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "open-room", rename_all = "camelCase")]
    OpenRoom { user_id: i64, room_id: i64 },
    #[serde(rename = "join-room-as-teacher", rename_all = "camelCase")]
    JoinRoomAsTeacher { channel_id: String, user_id: i64 },
    #[serde(rename = "join-room-as-student", rename_all = "camelCase")]
    JoinRoomAsStudent {
        channel_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    #[serde(rename = "leave-room")]
    LeaveRoom,
    #[serde(rename = "change-name")]
    ChangeName { name: String },
    #[serde(rename = "update-handSignal", rename_all = "camelCase")]
    UpdateHandSignal { hand_signal: bool },
    #[serde(rename = "update-permission", rename_all = "camelCase")]
    UpdatePermission { student_id: String, permission: bool },
    #[serde(rename = "update-settings")]
    UpdateSettings(RoomSettings),
    #[serde(rename = "connect-webcam", rename_all = "camelCase")]
    ConnectWebcam { user_id: String, peer_id: String },
    #[serde(rename = "update-webcam")]
    UpdateWebcam { video: bool, audio: bool },
    #[serde(rename = "add-note")]
    AddNote { name: String },
    #[serde(rename = "update-note")]
    UpdateNote { id: i64, content: String },
    #[serde(rename = "delete-note")]
    DeleteNote { id: i64 },
    #[serde(rename = "whiteboard-change")]
    WhiteboardChange { canvas: String },
}

/// Unsolicited events pushed by the hub. The hub sequences these; clients
/// apply them in receipt order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "student-joined")]
    StudentJoined(Student),
    #[serde(rename = "student-left")]
    StudentLeft { id: String },
    #[serde(rename = "teacher-joined")]
    TeacherJoined(Teacher),
    #[serde(rename = "teacher-left")]
    TeacherLeft,
    #[serde(rename = "change-name")]
    NameChanged { id: String, name: String },
    #[serde(rename = "room-closed")]
    RoomClosed { id: i64 },
    #[serde(rename = "exception")]
    Exception { message: String },
    #[serde(rename = "update-handSignal", rename_all = "camelCase")]
    HandSignalUpdated { id: String, hand_signal: bool },
    #[serde(rename = "update-permission")]
    PermissionUpdated { id: String, permission: bool },
    #[serde(rename = "update-webcam")]
    WebcamUpdated { id: String, video: bool, audio: bool },
    #[serde(rename = "update-settings")]
    SettingsUpdated(RoomSettings),
    #[serde(rename = "connect-webcam", rename_all = "camelCase")]
    WebcamConnect { user_id: String, peer_id: String },
    #[serde(rename = "note-added")]
    NoteAdded(Note),
    #[serde(rename = "note-updated")]
    NoteUpdated { id: i64, content: String },
    #[serde(rename = "note-deleted")]
    NoteDeleted { id: i64 },
    #[serde(rename = "whiteboard-change")]
    WhiteboardChanged { canvas: String },
}

/// One outbound frame: an event, optionally tagged with an ack id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub event: ClientEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

/// One inbound frame: either an acknowledgement or an unsolicited event.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum HubFrame {
    Ack { ack: u64, data: Value },
    Event(ServerEvent),
}

/// Extracts the error discriminator from an acknowledgement payload, if any.
pub fn ack_error(data: &Value) -> Option<JoinError> {
    data.get("error")
        .and_then(Value::as_str)
        .map(JoinError::from_code)
}

/// Newline-delimited JSON framing over the hub connection.
#[derive(Debug, Default)]
pub struct EventCodec;

impl Encoder<ClientFrame> for EventCodec {
    type Error = ChannelError;

    fn encode(&mut self, frame: ClientFrame, dst: &mut BytesMut) -> Result<(), ChannelError> {
        let line = serde_json::to_vec(&frame)?;
        dst.reserve(line.len() + 1);
        dst.extend_from_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Decoder for EventCodec {
    type Item = HubFrame;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HubFrame>, ChannelError> {
        let Some(pos) = src.iter().position(|byte| *byte == b'\n') else {
            return Ok(None);
        };
        let line = src.split_to(pos + 1);
        let frame = serde_json::from_slice(&line[..pos])?;
        Ok(Some(frame))
    }
}

/// Establishes the hub connection and completes the transport handshake.
pub trait HubConnector {
    fn connect(&mut self, config: &HubConfig) -> Result<Box<dyn HubSession>, ChannelError>;
}

/// A live hub connection after the handshake assigned a client id.
///
/// `request` blocks until the matching acknowledgement arrives; unsolicited
/// events received in the meantime are buffered and surfaced by later `poll`
/// calls in receipt order. An unsolicited close surfaces as
/// [`ChannelError::Disconnected`].
pub trait HubSession {
    fn client_id(&self) -> &str;
    fn send(&mut self, event: ClientEvent) -> Result<(), ChannelError>;
    fn request(&mut self, event: ClientEvent) -> Result<Value, ChannelError>;
    fn poll(&mut self) -> Result<Option<ServerEvent>, ChannelError>;
    fn close(&mut self) {}
}

impl std::fmt::Debug for dyn HubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSession")
            .field("client_id", &self.client_id())
            .finish()
    }
}

/// Shared handle to the live connection; sub-sessions hold one but never
/// outlive the channel that created it.
pub type SharedHub = Rc<RefCell<Box<dyn HubSession>>>;

/// Blocking framed transport over any byte stream. The stream is expected to
/// be in non-blocking mode once the handshake is done, so `poll` can report
/// an idle connection instead of stalling the caller.
pub struct BlockingHubTransport<S> {
    stream: S,
    codec: EventCodec,
    read_buf: BytesMut,
    pending: VecDeque<ServerEvent>,
    next_ack: u64,
    client_id: String,
}

impl<S> std::fmt::Debug for BlockingHubTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingHubTransport")
            .field("client_id", &self.client_id)
            .field("next_ack", &self.next_ack)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    client_id: String,
}

impl<S: Read + Write> BlockingHubTransport<S> {
    /// Wraps the stream and waits for the hello frame carrying the
    /// transport-assigned client id.
    pub fn handshake(stream: S) -> Result<Self, ChannelError> {
        let mut transport = Self {
            stream,
            codec: EventCodec,
            read_buf: BytesMut::with_capacity(4096),
            pending: VecDeque::new(),
            next_ack: 0,
            client_id: String::new(),
        };

        loop {
            match transport.read_frame()? {
                HubFrame::Ack { ack: 0, data } => {
                    let hello: Hello = serde_json::from_value(data)?;
                    transport.client_id = hello.client_id;
                    return Ok(transport);
                }
                HubFrame::Ack { ack, .. } => {
                    return Err(ChannelError::Protocol(format!(
                        "unexpected ack {ack} before handshake"
                    )));
                }
                HubFrame::Event(event) => transport.pending.push_back(event),
            }
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn write_frame(&mut self, frame: ClientFrame) -> Result<(), ChannelError> {
        let mut out = BytesMut::with_capacity(512);
        self.codec.encode(frame, &mut out)?;
        self.stream.write_all(&out)?;
        Ok(())
    }

    /// Blocks until one full frame is available. A closed stream maps to
    /// [`ChannelError::Disconnected`].
    fn read_frame(&mut self) -> Result<HubFrame, ChannelError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }

            let mut buffer = [0u8; 4096];
            match self.stream.read(&mut buffer) {
                Ok(0) => return Err(ChannelError::Disconnected),
                Ok(bytes_read) => self.read_buf.extend_from_slice(&buffer[..bytes_read]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    // Waiting for an ack on a non-blocking stream.
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Reads one frame without blocking; `Ok(None)` means the connection is
    /// idle.
    fn try_read_frame(&mut self) -> Result<Option<HubFrame>, ChannelError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(frame));
            }

            let mut buffer = [0u8; 4096];
            match self.stream.read(&mut buffer) {
                Ok(0) => return Err(ChannelError::Disconnected),
                Ok(bytes_read) => self.read_buf.extend_from_slice(&buffer[..bytes_read]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(error) => return Err(error.into()),
            }
        }
    }
}

impl<S: Read + Write> HubSession for BlockingHubTransport<S> {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn send(&mut self, event: ClientEvent) -> Result<(), ChannelError> {
        self.write_frame(ClientFrame { event, ack: None })
    }

    fn request(&mut self, event: ClientEvent) -> Result<Value, ChannelError> {
        self.next_ack += 1;
        let ack_id = self.next_ack;
        self.write_frame(ClientFrame {
            event,
            ack: Some(ack_id),
        })?;

        loop {
            match self.read_frame()? {
                HubFrame::Ack { ack, data } if ack == ack_id => return Ok(data),
                HubFrame::Ack { ack, .. } => {
                    log::warn!("dropping stale ack {ack} while waiting for {ack_id}");
                }
                HubFrame::Event(server_event) => self.pending.push_back(server_event),
            }
        }
    }

    fn poll(&mut self) -> Result<Option<ServerEvent>, ChannelError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        match self.try_read_frame()? {
            None => Ok(None),
            Some(HubFrame::Event(event)) => Ok(Some(event)),
            Some(HubFrame::Ack { ack, .. }) => {
                log::warn!("dropping unsolicited ack {ack}");
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        let _ = self.stream.flush();
    }
}

/// Connector that dials a socket with the supplied function and runs the
/// framed handshake over it.
pub struct SocketHubConnector<F> {
    connect: F,
}

impl<F> SocketHubConnector<F> {
    pub fn new(connect: F) -> Self {
        Self { connect }
    }
}

impl<F, S> HubConnector for SocketHubConnector<F>
where
    F: FnMut(&HubConfig) -> Result<S, ChannelError>,
    S: Read + Write + 'static,
{
    fn connect(&mut self, config: &HubConfig) -> Result<Box<dyn HubSession>, ChannelError> {
        let stream = (self.connect)(config)?;
        let transport = BlockingHubTransport::handshake(stream)?;
        log::info!("hub handshake complete, client id {}", transport.client_id());
        Ok(Box::new(transport))
    }
}

#[cfg(not(feature = "coverage"))]
pub fn tls_connect(config: &HubConfig) -> Result<openssl::ssl::SslStream<TcpStream>, ChannelError> {
    let address = format!("{}:{}", config.server, config.port);
    let tcp = TcpStream::connect(address)?;
    let builder = SslConnector::builder(SslMethod::tls())
        .map_err(|err| ChannelError::Io(format!("tls connector init failed: {err}")))?;
    let connector = builder.build();
    let stream = connector
        .connect(&config.server, tcp)
        .map_err(|err| ChannelError::Io(format!("tls handshake failed: {err}")))?;
    stream.get_ref().set_nonblocking(true)?;
    Ok(stream)
}


#[cfg(test)]
mod tests {
    use super::{
        ack_error, BlockingHubTransport, ClientEvent, ClientFrame, EventCodec, HubConnector,
        HubFrame, HubSession, ServerEvent, SocketHubConnector,
    };
    use crate::channel::config::{HubConfig, DEFAULT_PORT};
    use crate::transport::errors::{ChannelError, JoinError};
    use crate::transport::types::RoomSettings;
    use bytes::BytesMut;
    use serde_json::json;
    use std::io::{Cursor, Read, Write};
    use tokio_util::codec::{Decoder, Encoder};

    #[derive(Default)]
    struct MemoryStream {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl MemoryStream {
        fn with_read_data(data: Vec<u8>) -> Self {
            Self {
                read: Cursor::new(data),
                written: Vec::new(),
            }
        }
    }

    impl Read for MemoryStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }

    impl Write for MemoryStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Stream that reports an idle (non-blocking) connection after its
    /// scripted data runs out.
    struct IdleStream {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for IdleStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let bytes_read = self.read.read(buf)?;
            if bytes_read == 0 {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            Ok(bytes_read)
        }
    }

    impl Write for IdleStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn lines(frames: &[serde_json::Value]) -> Vec<u8> {
        let mut data = Vec::new();
        for frame in frames {
            data.extend_from_slice(frame.to_string().as_bytes());
            data.push(b'\n');
        }
        data
    }

    fn hello_frame() -> serde_json::Value {
        json!({"ack": 0, "data": {"clientId": "c1"}})
    }

    fn written_lines(written: &[u8]) -> Vec<serde_json::Value> {
        written
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).expect("written frame is not json"))
            .collect()
    }

    /// Event names and payload keys serialize exactly as the hub expects.
    #[test]
    fn client_events_use_hub_names() {
        // Arrange
        let cases = vec![
            (
                ClientEvent::JoinRoomAsStudent {
                    channel_id: "R1".to_string(),
                    name: "Connecting...".to_string(),
                    password: None,
                },
                json!({"event": "join-room-as-student",
                       "data": {"channelId": "R1", "name": "Connecting..."}}),
            ),
            (
                ClientEvent::UpdateHandSignal { hand_signal: true },
                json!({"event": "update-handSignal", "data": {"handSignal": true}}),
            ),
            (
                ClientEvent::UpdateSettings(RoomSettings { global_mute: true }),
                json!({"event": "update-settings", "data": {"globalMute": true}}),
            ),
            (ClientEvent::LeaveRoom, json!({"event": "leave-room"})),
        ];

        for (event, expected) in cases {
            // Act
            let serialized = serde_json::to_value(&event).expect("serialize failed");
            // Assert
            assert_eq!(serialized, expected);
        }
    }

    /// The codec writes one frame per line and reads it back.
    #[test]
    fn codec_roundtrips_frames() {
        // Arrange
        let mut codec = EventCodec;
        let mut buffer = BytesMut::new();
        let frame = ClientFrame {
            event: ClientEvent::ChangeName {
                name: "Alice".to_string(),
            },
            ack: Some(3),
        };

        // Act
        codec.encode(frame, &mut buffer).expect("encode failed");

        // Assert
        assert_eq!(buffer.last(), Some(&b'\n'));
        let value: serde_json::Value =
            serde_json::from_slice(&buffer[..buffer.len() - 1]).expect("not json");
        assert_eq!(
            value,
            json!({"event": "change-name", "data": {"name": "Alice"}, "ack": 3})
        );
    }

    /// Partial lines decode to nothing until the newline arrives.
    #[test]
    fn codec_waits_for_full_line() {
        // Arrange
        let mut codec = EventCodec;
        let mut buffer = BytesMut::from(&b"{\"event\":\"teacher-left\"}"[..]);

        // Act
        let first = codec.decode(&mut buffer).expect("decode failed");
        buffer.extend_from_slice(b"\n");
        let second = codec.decode(&mut buffer).expect("decode failed");

        // Assert
        assert!(first.is_none());
        assert!(matches!(
            second,
            Some(HubFrame::Event(ServerEvent::TeacherLeft))
        ));
    }

    /// Inbound frames split into acks and events.
    #[test]
    fn hub_frames_distinguish_acks_from_events() {
        // Arrange
        let ack = json!({"ack": 2, "data": {"error": "wrong-password"}});
        let event = json!({"event": "student-left", "data": {"id": "s1"}});

        // Act
        let ack_frame: HubFrame = serde_json::from_value(ack).expect("ack parse failed");
        let event_frame: HubFrame = serde_json::from_value(event).expect("event parse failed");

        // Assert
        match ack_frame {
            HubFrame::Ack { ack, data } => {
                assert_eq!(ack, 2);
                assert_eq!(ack_error(&data), Some(JoinError::WrongPassword));
            }
            HubFrame::Event(_) => panic!("expected ack frame"),
        }
        assert!(matches!(
            event_frame,
            HubFrame::Event(ServerEvent::StudentLeft { id }) if id == "s1"
        ));
    }

    /// The handshake consumes the hello frame and keeps earlier events.
    #[test]
    fn handshake_assigns_client_id_and_buffers_events() {
        // Arrange
        let data = lines(&[
            json!({"event": "teacher-left"}),
            hello_frame(),
        ]);
        let stream = IdleStream {
            read: Cursor::new(data),
            written: Vec::new(),
        };

        // Act
        let mut transport = BlockingHubTransport::handshake(stream).expect("handshake failed");

        // Assert
        assert_eq!(transport.client_id(), "c1");
        assert!(matches!(
            transport.poll().expect("poll failed"),
            Some(ServerEvent::TeacherLeft)
        ));
        assert!(transport.poll().expect("poll failed").is_none());
    }

    /// A closed stream before the hello frame surfaces as a disconnect.
    #[test]
    fn handshake_rejects_closed_stream() {
        // Arrange
        let stream = MemoryStream::default();
        // Act
        let err = BlockingHubTransport::handshake(stream).expect_err("expected failure");
        // Assert
        assert!(matches!(err, ChannelError::Disconnected));
    }

    /// `request` correlates the matching ack and buffers unsolicited events
    /// that arrive first.
    #[test]
    fn request_correlates_ack_and_buffers_events() {
        // Arrange
        let data = lines(&[
            hello_frame(),
            json!({"event": "teacher-left"}),
            json!({"ack": 1, "data": {"ok": true}}),
        ]);
        let stream = IdleStream {
            read: Cursor::new(data),
            written: Vec::new(),
        };
        let mut transport = BlockingHubTransport::handshake(stream).expect("handshake failed");

        // Act
        let ack = transport
            .request(ClientEvent::ChangeName {
                name: "Alice".to_string(),
            })
            .expect("request failed");

        // Assert
        assert_eq!(ack, json!({"ok": true}));
        assert!(matches!(
            transport.poll().expect("poll failed"),
            Some(ServerEvent::TeacherLeft)
        ));

        let written = written_lines(&transport.into_inner().written);
        assert_eq!(
            written,
            vec![json!({"event": "change-name", "data": {"name": "Alice"}, "ack": 1})]
        );
    }

    /// `send` writes a frame without an ack id.
    #[test]
    fn send_writes_un_acked_frame() {
        // Arrange
        let stream = IdleStream {
            read: Cursor::new(lines(&[hello_frame()])),
            written: Vec::new(),
        };
        let mut transport = BlockingHubTransport::handshake(stream).expect("handshake failed");

        // Act
        transport
            .send(ClientEvent::UpdateWebcam {
                video: false,
                audio: true,
            })
            .expect("send failed");

        // Assert
        let written = written_lines(&transport.into_inner().written);
        assert_eq!(
            written,
            vec![json!({"event": "update-webcam", "data": {"video": false, "audio": true}})]
        );
    }

    /// EOF while polling surfaces as a disconnect.
    #[test]
    fn poll_maps_eof_to_disconnect() {
        // Arrange
        let stream = MemoryStream::with_read_data(lines(&[hello_frame()]));
        let mut transport = BlockingHubTransport::handshake(stream).expect("handshake failed");

        // Act
        let err = transport.poll().expect_err("expected disconnect");

        // Assert
        assert!(matches!(err, ChannelError::Disconnected));
    }

    /// The socket connector dials, hands the stream to the transport and
    /// completes the handshake.
    #[test]
    fn socket_connector_builds_session() {
        // Arrange
        let mut stream = Some(IdleStream {
            read: Cursor::new(lines(&[hello_frame()])),
            written: Vec::new(),
        });
        let mut connector =
            SocketHubConnector::new(move |_: &HubConfig| -> Result<IdleStream, ChannelError> {
                Ok(stream.take().expect("stream already taken"))
            });
        let config = HubConfig::new("classroom.example".to_string(), DEFAULT_PORT);

        // Act
        let session = connector.connect(&config).expect("connect failed");

        // Assert
        assert_eq!(session.client_id(), "c1");
    }

    /// Dial failures are forwarded to the caller.
    #[test]
    fn socket_connector_propagates_connect_error() {
        // Arrange
        let mut connector =
            SocketHubConnector::new(|_: &HubConfig| -> Result<MemoryStream, ChannelError> {
                Err(ChannelError::Io("connect failed".to_string()))
            });
        let config = HubConfig::new("classroom.example".to_string(), DEFAULT_PORT);

        // Act
        let err = connector.connect(&config).expect_err("expected failure");

        // Assert
        assert!(matches!(err, ChannelError::Io(_)));
    }
}
