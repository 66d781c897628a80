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

//! The host <-> engine link. Every frame carries the connection id it concerns (0 for the host
//! itself) and a JSON object body, which is almost always a command record.

mod link_codec;

pub use link_codec::{LinkCodec, LinkFrame, MAX_FRAME_LENGTH};

use std::io;
use thiserror::Error;
use twine_common::tasks::CommandFormatError;

/// Errors at the link framing / encoding layer.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("link i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("frame too short to carry a connection id ({0} bytes)")]
    TooShort(usize),
    #[error("could not decode frame body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame body is not a JSON object")]
    NotAnObject,
    #[error("frame body is not a command: {0}")]
    NotACommand(#[from] CommandFormatError),
}
