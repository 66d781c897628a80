// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use twine_common::tasks::{Command, ConnId};

/// Upper bound on a single frame body, connection id included.
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

const CONNID_LEN: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, PartialEq)]
pub struct LinkFrame {
    pub connid: ConnId,
    pub body: Map<String, Value>,
}

impl LinkFrame {
    pub fn new(connid: ConnId, body: Map<String, Value>) -> Self {
        Self { connid, body }
    }

    pub fn command(connid: ConnId, command: &Command) -> Self {
        Self {
            connid,
            body: command.to_object(),
        }
    }

    pub fn into_command(self) -> Result<(ConnId, Command), FrameError> {
        let command = Command::from_object(self.body)?;
        Ok((self.connid, command))
    }
}

/// `u32` big-endian length prefix, then a `u64` big-endian connection id, then the JSON body.
pub struct LinkCodec {
    framing: LengthDelimitedCodec,
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        let framing = LengthDelimitedCodec::builder()
            .length_field_type::<u32>()
            .big_endian()
            .max_frame_length(max_length)
            .new_codec();
        Self { framing }
    }
}

impl Decoder for LinkCodec {
    type Item = LinkFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut frame) = self.framing.decode(src)? else {
            return Ok(None);
        };
        if frame.len() < CONNID_LEN {
            return Err(FrameError::TooShort(frame.len()));
        }
        let connid = ConnId(frame.get_u64());
        match serde_json::from_slice::<Value>(&frame)? {
            Value::Object(body) => Ok(Some(LinkFrame { connid, body })),
            _ => Err(FrameError::NotAnObject),
        }
    }
}

impl Encoder<LinkFrame> for LinkCodec {
    type Error = FrameError;

    fn encode(&mut self, item: LinkFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&Value::Object(item.body))?;
        let mut frame = BytesMut::with_capacity(CONNID_LEN + body.len());
        frame.put_u64(item.connid.0);
        frame.extend_from_slice(&body);
        self.framing.encode(Bytes::from(frame), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn frames_carry_connid_and_body() {
        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::new();
        let frame = LinkFrame::new(ConnId(42), object(json!({"cmd": "playerok", "connid": 42})));
        codec.encode(frame.clone(), &mut buf).unwrap();

        // length prefix, then connid
        assert_eq!(&buf[4..12], &42u64.to_be_bytes());
        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(declared, buf.len() - 4);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_input() {
        let mut codec = LinkCodec::new();
        let mut full = BytesMut::new();
        codec
            .encode(LinkFrame::command(ConnId(0), &Command::new("connectok")), &mut full)
            .unwrap();

        let mut partial = full.split_to(full.len() - 3);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.unsplit(full);
        let (connid, command) = codec.decode(&mut partial).unwrap().unwrap().into_command().unwrap();
        assert_eq!(connid, ConnId(0));
        assert_eq!(command.name(), "connectok");
    }

    #[test]
    fn oversize_frames_are_rejected() {
        let mut codec = LinkCodec::with_max_length(32);
        let mut buf = BytesMut::new();
        let big = LinkFrame::command(ConnId(1), &Command::message("x".repeat(64)));
        assert!(matches!(codec.encode(big, &mut buf), Err(FrameError::Io(_))));

        let mut incoming = BytesMut::new();
        incoming.put_u32(1024);
        incoming.put_u64(1);
        assert!(matches!(codec.decode(&mut incoming), Err(FrameError::Io(_))));
    }

    #[test]
    fn bodies_must_be_objects() {
        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::new();
        let body = b"[1,2,3]";
        buf.put_u32((CONNID_LEN + body.len()) as u32);
        buf.put_u64(5);
        buf.extend_from_slice(body);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::NotAnObject)));

        let mut short = BytesMut::new();
        short.put_u32(2);
        short.extend_from_slice(&[0, 1]);
        assert!(matches!(codec.decode(&mut short), Err(FrameError::TooShort(2))));
    }
}
