//! Minimal RFB (VNC) client.
//!
//! Speaks protocol versions 3.3, 3.7 and 3.8 with security type None and the
//! Raw encoding only. The server is asked for 32bpp little-endian true colour
//! with red at bit 16, so every pixel arrives as `B G R X`.

use anyhow::{Context, Result, anyhow, bail};
use image::{Rgba, RgbaImage};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::frame::Frame;
use super::session::{MouseButton, RemoteDisplay};

const SECURITY_INVALID: u8 = 0;
const SECURITY_NONE: u8 = 1;
const SECURITY_VNC_AUTH: u8 = 2;

const ENCODING_RAW: i32 = 0;

// Client to server messages
const MSG_SET_PIXEL_FORMAT: u8 = 0;
const MSG_SET_ENCODINGS: u8 = 2;
const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
const MSG_POINTER_EVENT: u8 = 5;

// Server to client messages
const MSG_FRAMEBUFFER_UPDATE: u8 = 0;
const MSG_SET_COLOUR_MAP_ENTRIES: u8 = 1;
const MSG_BELL: u8 = 2;
const MSG_SERVER_CUT_TEXT: u8 = 3;

const BYTES_PER_PIXEL: usize = 4;

/// Upper bound for server supplied strings (desktop name, reasons, cut text).
const MAX_STRING_LEN: u32 = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// Picks the highest supported version not above the server's.
    fn negotiate(server: &[u8; 12]) -> Result<Self> {
        let text = std::str::from_utf8(server)
            .map_err(|_| anyhow!("Not an RFB server: {:?}", server))?;
        if !text.starts_with("RFB ") || !text.ends_with('\n') {
            bail!("Not an RFB server: {:?}", text);
        }

        let (major, minor) = text[4..11]
            .split_once('.')
            .ok_or_else(|| anyhow!("Malformed RFB version: {:?}", text))?;
        let major: u32 = major
            .parse()
            .with_context(|| format!("Malformed RFB version: {:?}", text))?;
        let minor: u32 = minor
            .parse()
            .with_context(|| format!("Malformed RFB version: {:?}", text))?;

        match (major, minor) {
            (3, 0..=6) => Ok(ProtocolVersion::V3_3),
            (3, 7) => Ok(ProtocolVersion::V3_7),
            (3, _) => Ok(ProtocolVersion::V3_8),
            (m, _) if m > 3 => Ok(ProtocolVersion::V3_8),
            _ => bail!("Unsupported RFB version {}.{}", major, minor),
        }
    }

    fn handshake_bytes(self) -> &'static [u8; 12] {
        match self {
            ProtocolVersion::V3_3 => b"RFB 003.003\n",
            ProtocolVersion::V3_7 => b"RFB 003.007\n",
            ProtocolVersion::V3_8 => b"RFB 003.008\n",
        }
    }
}

/// A connected RFB session.
///
/// The connection is closed on drop if [`RemoteDisplay::disconnect`] has not
/// been called.
pub struct RfbSession {
    stream: TcpStream,
    framebuffer: RgbaImage,
    name: String,
    pointer: (u16, u16),
    connected: bool,
}

impl RfbSession {
    /// Connects and completes the protocol handshake.
    ///
    /// `timeout` bounds the connect and every later socket read and write.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let timeout = timeout.max(Duration::from_millis(1));
        let addr = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}:{}", host, port))?
            .next()
            .ok_or_else(|| anyhow!("No address found for {}:{}", host, port))?;

        info!("Connecting to {}:{}", host, port);
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        Self::handshake(stream)
            .with_context(|| format!("RFB handshake with {}:{} failed", host, port))
    }

    fn handshake(mut stream: TcpStream) -> Result<Self> {
        let mut server_version = [0u8; 12];
        stream.read_exact(&mut server_version)?;
        let version = ProtocolVersion::negotiate(&server_version)?;
        stream.write_all(version.handshake_bytes())?;
        debug!("Negotiated RFB protocol {:?}", version);

        negotiate_security(&mut stream, version)?;

        // ClientInit: share the desktop with other viewers
        stream.write_all(&[1])?;

        let width = read_u16(&mut stream)?;
        let height = read_u16(&mut stream)?;
        let mut server_format = [0u8; 16];
        stream.read_exact(&mut server_format)?;
        let name = read_string(&mut stream)?;
        info!("Connected to '{}' ({}x{})", name, width, height);

        stream.write_all(&set_pixel_format_message())?;
        stream.write_all(&set_encodings_message(&[ENCODING_RAW]))?;

        Ok(Self {
            stream,
            framebuffer: RgbaImage::new(u32::from(width), u32::from(height)),
            name,
            pointer: (0, 0),
            connected: true,
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            bail!("RFB session is disconnected");
        }
        Ok(())
    }

    fn send_pointer(&mut self, mask: u8) -> Result<()> {
        let (x, y) = self.pointer;
        self.stream
            .write_all(&pointer_event_message(mask, x, y))
            .context("Failed to send pointer event")
    }

    /// Reads server messages until one framebuffer update has been applied.
    fn read_until_update(&mut self) -> Result<()> {
        loop {
            match read_u8(&mut self.stream)? {
                MSG_FRAMEBUFFER_UPDATE => return self.read_framebuffer_update(),
                MSG_SET_COLOUR_MAP_ENTRIES => {
                    skip(&mut self.stream, 1)?;
                    let _first = read_u16(&mut self.stream)?;
                    let count = read_u16(&mut self.stream)?;
                    skip(&mut self.stream, usize::from(count) * 6)?;
                }
                MSG_BELL => debug!("Server rang the bell"),
                MSG_SERVER_CUT_TEXT => {
                    skip(&mut self.stream, 3)?;
                    let len = read_u32(&mut self.stream)?;
                    skip(&mut self.stream, len as usize)?;
                }
                other => bail!("Unexpected server message type {}", other),
            }
        }
    }

    fn read_framebuffer_update(&mut self) -> Result<()> {
        skip(&mut self.stream, 1)?;
        let rects = read_u16(&mut self.stream)?;

        for _ in 0..rects {
            let x = read_u16(&mut self.stream)?;
            let y = read_u16(&mut self.stream)?;
            let w = read_u16(&mut self.stream)?;
            let h = read_u16(&mut self.stream)?;
            let encoding = read_i32(&mut self.stream)?;
            if encoding != ENCODING_RAW {
                bail!("Unsupported encoding {} in framebuffer update", encoding);
            }

            let mut pixels = vec![0u8; usize::from(w) * usize::from(h) * BYTES_PER_PIXEL];
            self.stream.read_exact(&mut pixels)?;
            self.blit(x, y, w, &pixels);
        }

        debug!("Applied framebuffer update with {} rectangle(s)", rects);
        Ok(())
    }

    fn blit(&mut self, x: u16, y: u16, w: u16, pixels: &[u8]) {
        let w = usize::from(w);
        for (i, px) in pixels.chunks_exact(BYTES_PER_PIXEL).enumerate() {
            let px_x = u32::from(x) + (i % w) as u32;
            let px_y = u32::from(y) + (i / w) as u32;
            if px_x < self.framebuffer.width() && px_y < self.framebuffer.height() {
                self.framebuffer
                    .put_pixel(px_x, px_y, Rgba([px[2], px[1], px[0], 255]));
            }
        }
    }
}

impl RemoteDisplay for RfbSession {
    fn move_pointer(&mut self, x: u16, y: u16) -> Result<()> {
        self.ensure_connected()?;
        debug!("Moving pointer to ({}, {})", x, y);
        self.pointer = (x, y);
        self.send_pointer(0)
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.ensure_connected()?;
        debug!("Clicking {:?} at {:?}", button, self.pointer);
        self.send_pointer(button.mask())?;
        self.send_pointer(0)
    }

    fn refresh(&mut self) -> Result<()> {
        self.ensure_connected()?;
        // Dimensions come from ServerInit, so they fit in u16
        let request = update_request_message(
            false,
            self.framebuffer.width() as u16,
            self.framebuffer.height() as u16,
        );
        self.stream
            .write_all(&request)
            .context("Failed to request framebuffer update")?;
        self.read_until_update()
            .context("Failed to receive framebuffer update")
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        self.refresh()?;
        Ok(Frame::new(self.framebuffer.clone()))
    }

    fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        info!("Disconnecting from '{}'", self.name);
        self.stream
            .shutdown(Shutdown::Both)
            .context("Failed to close RFB connection")
    }
}

impl Drop for RfbSession {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("{:#}", e);
        }
    }
}

fn negotiate_security(stream: &mut TcpStream, version: ProtocolVersion) -> Result<()> {
    if version == ProtocolVersion::V3_3 {
        // The server decides; the type arrives as a u32
        let kind = read_u32(stream)?;
        return match u8::try_from(kind) {
            Ok(SECURITY_NONE) => Ok(()),
            Ok(SECURITY_INVALID) => Err(anyhow!(
                "Server refused connection: {}",
                read_string(stream)?
            )),
            Ok(SECURITY_VNC_AUTH) => bail!("VNC password authentication is not supported"),
            _ => bail!("Unsupported security type {}", kind),
        };
    }

    let count = read_u8(stream)?;
    if count == 0 {
        bail!("Server refused connection: {}", read_string(stream)?);
    }
    let mut types = vec![0u8; usize::from(count)];
    stream.read_exact(&mut types)?;

    if !types.contains(&SECURITY_NONE) {
        if types.contains(&SECURITY_VNC_AUTH) {
            bail!("VNC password authentication is not supported");
        }
        bail!("No supported security type offered: {:?}", types);
    }
    stream.write_all(&[SECURITY_NONE])?;

    // 3.7 sends no SecurityResult for type None
    if version == ProtocolVersion::V3_8 {
        let result = read_u32(stream)?;
        if result != 0 {
            bail!("Security handshake failed: {}", read_string(stream)?);
        }
    }
    Ok(())
}

fn set_pixel_format_message() -> [u8; 20] {
    [
        MSG_SET_PIXEL_FORMAT,
        0,
        0,
        0,
        32, // bits per pixel
        24, // depth
        0,  // little endian
        1,  // true colour
        0,
        255, // red max
        0,
        255, // green max
        0,
        255, // blue max
        16,  // red shift
        8,   // green shift
        0,   // blue shift
        0,
        0,
        0,
    ]
}

fn set_encodings_message(encodings: &[i32]) -> Vec<u8> {
    let mut msg = vec![MSG_SET_ENCODINGS, 0];
    msg.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
    for encoding in encodings {
        msg.extend_from_slice(&encoding.to_be_bytes());
    }
    msg
}

fn update_request_message(incremental: bool, width: u16, height: u16) -> [u8; 10] {
    let [w0, w1] = width.to_be_bytes();
    let [h0, h1] = height.to_be_bytes();
    [
        MSG_FRAMEBUFFER_UPDATE_REQUEST,
        u8::from(incremental),
        0,
        0,
        0,
        0,
        w0,
        w1,
        h0,
        h1,
    ]
}

fn pointer_event_message(mask: u8, x: u16, y: u16) -> [u8; 6] {
    let [x0, x1] = x.to_be_bytes();
    let [y0, y1] = y.to_be_bytes();
    [MSG_POINTER_EVENT, mask, x0, x1, y0, y1]
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Reads a u32 length-prefixed string.
fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        bail!("Server string of {} bytes is too long", len);
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn skip<R: Read>(reader: &mut R, len: usize) -> Result<()> {
    let copied = std::io::copy(&mut reader.take(len as u64), &mut std::io::sink())?;
    if copied != len as u64 {
        bail!("Connection closed by server");
    }
    Ok(())
}
