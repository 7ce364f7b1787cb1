//! Length-Prefixed Frames
//!
//! Pipes are byte streams; frames restore message boundaries. Each frame is
//! a 4-byte little-endian length followed by an rkyv payload.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Upper bound on a single frame. A run of a few thousand samples is well
/// under a megabyte; anything larger indicates a corrupt length prefix.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Failures while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying pipe error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(String),

    /// The payload failed validation or deserialization.
    #[error("deserialize error: {0}")]
    Deserialize(String),

    /// The declared frame length is implausible.
    #[error("frame of {size} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    Oversize {
        /// Declared payload length.
        size: usize,
    },

    /// A zero-length frame was read.
    #[error("zero-length frame")]
    Empty,

    /// The peer closed the stream between frames.
    #[error("end of stream")]
    EndOfStream,
}

/// Writes framed messages to a stream.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(32 * 1024, writer),
        }
    }

    /// Serialize `message` and write it as one frame, flushing immediately
    /// so the peer never blocks on a half-sent message.
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<512>>,
    {
        let payload = rkyv::to_bytes::<_, 512>(message)
            .map_err(|e| FrameError::Serialize(e.to_string()))?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::Oversize {
                size: payload.len(),
            });
        }

        self.writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads framed messages from a stream.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(32 * 1024, reader),
        }
    }

    /// Read one frame and deserialize it. Blocks until a full frame arrives.
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::EndOfStream);
            }
            Err(e) => return Err(FrameError::Io(e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::Oversize { size: len });
        }
        if len == 0 {
            return Err(FrameError::Empty);
        }

        // rkyv requires an aligned buffer for validation.
        let mut payload = rkyv::AlignedVec::with_capacity(len);
        payload.resize(len, 0);
        self.reader.read_exact(&mut payload)?;

        let archived = rkyv::check_archived_root::<T>(&payload)
            .map_err(|e| FrameError::Deserialize(e.to_string()))?;
        let value: T = archived
            .deserialize(&mut Infallible)
            .map_err(|_| FrameError::Deserialize("archived value did not deserialize".into()))?;
        Ok(value)
    }

    /// Whether bytes are already buffered from the stream.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{WorkerReply, WorkerRun};
    use std::io::Cursor;

    fn sample_run() -> WorkerRun {
        WorkerRun {
            warmups: vec![0.011],
            samples: vec![0.0101, 0.0099, 0.0100],
            loops: 64,
            metadata: Vec::new(),
        }
    }

    #[test]
    fn roundtrip_single_reply() {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer.write(&WorkerReply::Run(sample_run())).unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let decoded: WorkerReply = reader.read().unwrap();
        match decoded {
            WorkerReply::Run(run) => {
                assert_eq!(run.loops, 64);
                assert_eq!(run.warmups, vec![0.011]);
                assert_eq!(run.samples, vec![0.0101, 0.0099, 0.0100]);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn roundtrip_sequence_preserves_order() {
        let replies = vec![
            WorkerReply::Hello {
                protocol_version: 1,
            },
            WorkerReply::Calibrated { loops: 128 },
            WorkerReply::Run(sample_run()),
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for reply in &replies {
                writer.write(reply).unwrap();
            }
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let first: WorkerReply = reader.read().unwrap();
        assert!(matches!(
            first,
            WorkerReply::Hello {
                protocol_version: 1
            }
        ));
        let second: WorkerReply = reader.read().unwrap();
        assert!(matches!(second, WorkerReply::Calibrated { loops: 128 }));
        let third: WorkerReply = reader.read().unwrap();
        assert!(matches!(third, WorkerReply::Run(_)));
    }

    #[test]
    fn empty_stream_is_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        let outcome: Result<WorkerReply, _> = reader.read();
        assert!(matches!(outcome, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn oversize_length_prefix_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let outcome: Result<WorkerReply, _> = reader.read();
        assert!(matches!(outcome, Err(FrameError::Oversize { .. })));
    }

    #[test]
    fn zero_length_frame_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0u32.to_le_bytes());
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let outcome: Result<WorkerReply, _> = reader.read();
        assert!(matches!(outcome, Err(FrameError::Empty)));
    }
}
