// Line Log Codec
//
// Self-contained binary encoding of a line log.
//
// Layout (integers little-endian):
// - magic `LNLG`, format version (u8)
// - max_rev (u32)
// - revisions: per revision timestamp_ms (u64), flags (u8),
//   then commit id, author, message when flag bit 0 is set
// - lines: count (u32), per line rev (u32), retired (u32, 0 = alive), text
// - program: count (u32), per instruction opcode (u8) and operands (u32)
// - CRC32 of everything before it (u32)
//
// Text fields are a u32 byte length followed by UTF-8 bytes.

use crc32fast::Hasher;

use crate::log::{Instruction, LineLog, LineRecord, LogError, Provenance, Rev, RevisionRecord};

const MAGIC: &[u8; 4] = b"LNLG";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;
const CHECKSUM_LEN: usize = 4;

const FLAG_PROVENANCE: u8 = 1;

const OP_END: u8 = 0;
const OP_LINE: u8 = 1;
const OP_INSERT: u8 = 2;
const OP_RETIRE: u8 = 3;
const OP_JUMP: u8 = 4;

/// Returned when a blob cannot be decoded into a consistent line log.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CorruptState {
    #[error("blob too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad magic")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("truncated while reading {what} at offset {offset}")]
    Truncated { what: &'static str, offset: usize },

    #[error("invalid utf-8 in {what}")]
    InvalidUtf8 { what: &'static str },

    #[error("unknown opcode {opcode} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: usize },

    #[error("{what} {value} out of range at {at}")]
    OutOfRange {
        what: &'static str,
        value: usize,
        at: usize,
    },

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("program does not replay: {0}")]
    Program(#[from] LogError),
}

/// Returned when a log does not fit the format's 32-bit counts and lengths.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{what} too large to encode: {len}")]
    TooLarge { what: &'static str, len: usize },
}

/// Serialize `log`.
///
/// Line indices and program offsets are bounded by the encoded counts, so
/// once those fit every operand does.
pub fn export(log: &LineLog) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);

    put_u32(&mut buf, log.max_rev());
    for record in log.revision_records() {
        buf.extend_from_slice(&record.timestamp_ms.to_le_bytes());
        match &record.provenance {
            Some(provenance) => {
                buf.push(FLAG_PROVENANCE);
                put_str(&mut buf, "commit id", &provenance.commit_id)?;
                put_str(&mut buf, "author", &provenance.author)?;
                put_str(&mut buf, "message", &provenance.message)?;
            }
            None => buf.push(0),
        }
    }

    put_u32(&mut buf, encode_len("line count", log.lines().len())?);
    for line in log.lines() {
        put_u32(&mut buf, line.rev);
        put_u32(&mut buf, line.retired.unwrap_or(0));
        put_str(&mut buf, "line text", &line.text)?;
    }

    put_u32(&mut buf, encode_len("program length", log.program().len())?);
    for instruction in log.program() {
        match *instruction {
            Instruction::End => buf.push(OP_END),
            Instruction::Line { line } => {
                buf.push(OP_LINE);
                put_u32(&mut buf, line as u32);
            }
            Instruction::Insert { rev, skip } => {
                buf.push(OP_INSERT);
                put_u32(&mut buf, rev);
                put_u32(&mut buf, skip as u32);
            }
            Instruction::Retire { rev, skip } => {
                buf.push(OP_RETIRE);
                put_u32(&mut buf, rev);
                put_u32(&mut buf, skip as u32);
            }
            Instruction::Jump { target } => {
                buf.push(OP_JUMP);
                put_u32(&mut buf, target as u32);
            }
        }
    }

    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Deserialize a blob produced by [`export`].
pub fn import(bytes: &[u8]) -> Result<LineLog, CorruptState> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(CorruptState::TooShort { len: bytes.len() });
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(CorruptState::BadMagic);
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(CorruptState::UnsupportedVersion(version));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = compute_checksum(body);
    if stored != computed {
        return Err(CorruptState::ChecksumMismatch { stored, computed });
    }

    let mut reader = Reader {
        data: body,
        pos: HEADER_LEN,
    };

    let max_rev = reader.u32("max_rev")?;
    let mut revisions = Vec::new();
    for _ in 0..max_rev {
        let timestamp_ms = reader.u64("timestamp")?;
        let flags = reader.u8("revision flags")?;
        let provenance = if flags & FLAG_PROVENANCE != 0 {
            Some(Provenance {
                commit_id: reader.string("commit id")?,
                author: reader.string("author")?,
                message: reader.string("message")?,
            })
        } else {
            None
        };
        revisions.push(RevisionRecord {
            timestamp_ms,
            provenance,
        });
    }

    let line_count = reader.u32("line count")? as usize;
    let mut lines = Vec::new();
    for index in 0..line_count {
        let rev = reader.u32("line rev")?;
        let retired = reader.u32("line retirement")?;
        let text = reader.string("line text")?;
        check_rev("line rev", rev, max_rev, index)?;
        let retired = match retired {
            0 => None,
            retired if retired > rev && retired <= max_rev => Some(retired),
            retired => {
                return Err(CorruptState::Inconsistent(format!(
                    "line {index} introduced at {rev} retired at {retired}"
                )))
            }
        };
        lines.push(LineRecord { text, rev, retired });
    }

    let program_len = reader.u32("program length")? as usize;
    if program_len == 0 {
        return Err(CorruptState::Inconsistent("empty program".into()));
    }
    let mut program = Vec::new();
    for pc in 0..program_len {
        let opcode = reader.u8("opcode")?;
        let instruction = match opcode {
            OP_END => Instruction::End,
            OP_LINE => Instruction::Line {
                line: check_index("line", reader.u32("line id")?, line_count, pc)?,
            },
            OP_INSERT => {
                let rev = reader.u32("insert rev")?;
                check_rev("insert rev", rev, max_rev, pc)?;
                Instruction::Insert {
                    rev,
                    skip: check_index("skip", reader.u32("insert skip")?, program_len, pc)?,
                }
            }
            OP_RETIRE => {
                let rev = reader.u32("retire rev")?;
                check_rev("retire rev", rev, max_rev, pc)?;
                Instruction::Retire {
                    rev,
                    skip: check_index("skip", reader.u32("retire skip")?, program_len, pc)?,
                }
            }
            OP_JUMP => Instruction::Jump {
                target: check_index("jump target", reader.u32("jump target")?, program_len, pc)?,
            },
            opcode => return Err(CorruptState::UnknownOpcode { opcode, pc }),
        };
        program.push(instruction);
    }

    let remaining = reader.data.len() - reader.pos;
    if remaining != 0 {
        return Err(CorruptState::TrailingBytes(remaining));
    }

    let log = LineLog::from_parts(program, lines, revisions)?;
    // The widest path walks every run ever retired.
    log.execute(max_rev, Some(0))?;
    Ok(log)
}

impl LineLog {
    pub fn export(&self) -> Result<Vec<u8>, EncodeError> {
        export(self)
    }

    pub fn import(bytes: &[u8]) -> Result<Self, CorruptState> {
        import(bytes)
    }
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn encode_len(what: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLarge { what, len })
}

fn put_str(buf: &mut Vec<u8>, what: &'static str, value: &str) -> Result<(), EncodeError> {
    put_u32(buf, encode_len(what, value.len())?);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn check_rev(what: &'static str, rev: Rev, max_rev: Rev, at: usize) -> Result<(), CorruptState> {
    if rev == 0 || rev > max_rev {
        return Err(CorruptState::OutOfRange {
            what,
            value: rev as usize,
            at,
        });
    }
    Ok(())
}

fn check_index(what: &'static str, value: u32, len: usize, at: usize) -> Result<usize, CorruptState> {
    let value = value as usize;
    if value >= len {
        return Err(CorruptState::OutOfRange { what, value, at });
    }
    Ok(value)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], CorruptState> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CorruptState::Truncated {
                what,
                offset: self.pos,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, CorruptState> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, CorruptState> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CorruptState> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self, what: &'static str) -> Result<String, CorruptState> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CorruptState::InvalidUtf8 { what })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::RevisionMetadata;

    fn sample() -> LineLog {
        let mut log = LineLog::new();
        log.append_with_metadata(
            "fn a() {}\n",
            RevisionMetadata {
                commit_id: "0123abcd".into(),
                author: "carol".into(),
                message: "add a".into(),
                timestamp_ms: 1_700_000_000_000,
            },
        );
        log.append_at("fn a() {}\nfn b() {}\n", 1_700_000_500_000);
        log.append_at("fn b() {}\n", 1_700_000_600_000);
        log.append_at("fn b() {}\nfn c() {}", 1_700_000_700_000);
        log
    }

    #[test]
    fn round_trip_preserves_every_checkout() {
        let log = sample();
        let restored = import(&export(&log).unwrap()).unwrap();

        assert_eq!(restored.max_rev(), log.max_rev());
        for rev in 0..=log.max_rev() {
            assert_eq!(
                restored.checkout(rev, None).unwrap(),
                log.checkout(rev, None).unwrap()
            );
            assert_eq!(
                restored.checkout(rev, Some(0)).unwrap(),
                log.checkout(rev, Some(0)).unwrap()
            );
        }
        assert_eq!(restored, log);
    }

    #[test]
    fn restored_log_keeps_recording() {
        let mut log = sample();
        let mut restored = LineLog::import(&log.export().unwrap()).unwrap();

        assert_eq!(log.append_at("fn c() {}\n", 1), 5);
        assert_eq!(restored.append_at("fn c() {}\n", 1), 5);
        assert_eq!(restored, log);
    }

    #[test]
    fn empty_log_round_trips() {
        let restored = import(&export(&LineLog::new()).unwrap()).unwrap();
        assert!(restored.is_empty());
        assert!(restored.checkout(0, None).unwrap().is_empty());
    }

    #[test]
    fn rejects_short_and_foreign_blobs() {
        assert_eq!(import(b"LN").unwrap_err(), CorruptState::TooShort { len: 2 });
        assert_eq!(import(b"XXXX\x01\0\0\0\0").unwrap_err(), CorruptState::BadMagic);
        assert_eq!(
            import(b"LNLG\x09\0\0\0\0").unwrap_err(),
            CorruptState::UnsupportedVersion(9)
        );
    }

    #[test]
    fn rejects_flipped_bits() {
        let mut bytes = export(&sample()).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x40;
        assert!(matches!(
            import(&bytes).unwrap_err(),
            CorruptState::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = export(&sample()).unwrap();
        let mut cut = bytes[..bytes.len() - 12].to_vec();
        let checksum = compute_checksum(&cut);
        cut.extend_from_slice(&checksum.to_le_bytes());
        assert!(matches!(
            import(&cut).unwrap_err(),
            CorruptState::Truncated { .. }
        ));
    }

    fn reseal(mut body: Vec<u8>) -> Vec<u8> {
        let checksum = compute_checksum(&body);
        body.extend_from_slice(&checksum.to_le_bytes());
        body
    }

    #[test]
    fn rejects_dangling_jump() {
        let mut body = b"LNLG\x01".to_vec();
        put_u32(&mut body, 0); // max_rev
        put_u32(&mut body, 0); // lines
        put_u32(&mut body, 1); // program
        body.push(OP_JUMP);
        put_u32(&mut body, 7);

        assert_eq!(
            import(&reseal(body)).unwrap_err(),
            CorruptState::OutOfRange {
                what: "jump target",
                value: 7,
                at: 0
            }
        );
    }

    #[test]
    fn rejects_non_terminating_program() {
        let mut body = b"LNLG\x01".to_vec();
        put_u32(&mut body, 0);
        put_u32(&mut body, 0);
        put_u32(&mut body, 1);
        body.push(OP_JUMP);
        put_u32(&mut body, 0);

        assert!(matches!(
            import(&reseal(body)).unwrap_err(),
            CorruptState::Program(LogError::CorruptProgram { .. })
        ));
    }

    #[test]
    fn rejects_retirement_before_introduction() {
        let mut body = b"LNLG\x01".to_vec();
        put_u32(&mut body, 1);
        body.extend_from_slice(&0u64.to_le_bytes());
        body.push(0);
        put_u32(&mut body, 1); // one line
        put_u32(&mut body, 1);
        put_u32(&mut body, 1); // retired at its own revision
        put_str(&mut body, "line text", "x\n").unwrap();

        assert!(matches!(
            import(&reseal(body)).unwrap_err(),
            CorruptState::Inconsistent(_)
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let bytes = export(&LineLog::new()).unwrap();
        let mut body = bytes[..bytes.len() - CHECKSUM_LEN].to_vec();
        body.extend_from_slice(b"junk");
        assert_eq!(
            import(&reseal(body)).unwrap_err(),
            CorruptState::TrailingBytes(4)
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn lengths_past_u32_are_rejected() {
        let len = u32::MAX as usize + 1;
        assert_eq!(
            encode_len("line text", len),
            Err(EncodeError::TooLarge { what: "line text", len })
        );
        assert_eq!(encode_len("line text", u32::MAX as usize), Ok(u32::MAX));
    }
}
