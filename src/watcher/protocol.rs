//! Wire formats shared between the `vigil-watch` subprocess and its supervisor: the
//! stdout trap-line grammar and the command/response pipe grammar.

/// Environment variable carrying the decimal fd number the watcher reads commands
/// from.
pub const CMD_FD_VAR: &str = "VIGIL_WATCH_CMD_FD";
/// Environment variable carrying the decimal fd number the watcher writes
/// responses to.
pub const RESP_FD_VAR: &str = "VIGIL_WATCH_RESP_FD";

/// One parsed `WRITE` command read from the command pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub address: u64,
    pub bytes: Vec<u8>,
}

/// Parses a line from the command FD. Only `WRITE` is recognized.
pub fn parse_command(line: &str) -> Result<WriteCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty".to_string());
    }
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("WRITE") => {
            let addr_tok = parts.next().ok_or("missing address")?;
            let address =
                u64::from_str_radix(addr_tok, 16).map_err(|e| format!("bad address: {e}"))?;
            let mut bytes = Vec::new();
            for tok in parts {
                let b = u8::from_str_radix(tok, 16).map_err(|e| format!("bad byte {tok}: {e}"))?;
                bytes.push(b);
            }
            if bytes.is_empty() {
                return Err("no bytes provided".to_string());
            }
            Ok(WriteCommand { address, bytes })
        }
        Some(other) => Err(format!("unknown command: {other}")),
        None => Err("empty".to_string()),
    }
}

pub fn format_write_command(address: u64, bytes: &[u8]) -> String {
    let byte_str: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!("WRITE {address:x} {}\n", byte_str.join(" "))
}

/// One parsed trap-line hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapLine {
    pub tid: i32,
    pub rip: u64,
    pub bytes_hex: String,
    pub opcode: String,
}

pub fn format_trap_line(tid: i32, rip: u64, dr6: Option<i64>, bytes: &[u8], inst: &str) -> String {
    let dr6_str = dr6
        .map(|v| format!("0x{v:x}"))
        .unwrap_or_else(|| "peek-failed".to_string());
    let bytes_str: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "tid={tid} rip=0x{rip:x} dr6={dr6_str} bytes={} inst={inst}\n",
        bytes_str.join(" ")
    )
}

/// Tolerant parse: locates `rip=0x`, `bytes=`, `inst=` by substring search, ignoring
/// any fields between them (`dr6=`, or future additions). `tid=` is parsed as the
/// leading token.
pub fn parse_trap_line(line: &str) -> Option<TrapLine> {
    let tid = line
        .strip_prefix("tid=")?
        .split_whitespace()
        .next()?
        .parse::<i32>()
        .ok()?;

    let rip_pos = line.find("rip=0x")?;
    let rip_str = &line[rip_pos + "rip=0x".len()..];
    let rip_hex: String = rip_str.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
    let rip = u64::from_str_radix(&rip_hex, 16).ok()?;

    let bytes_pos = line[rip_pos..].find("bytes=")? + rip_pos;
    let bytes_start = bytes_pos + "bytes=".len();
    let inst_pos = line[bytes_start..].find("inst=")? + bytes_start;
    let bytes_hex = line[bytes_start..inst_pos].trim().to_string();
    let opcode = line[inst_pos + "inst=".len()..].trim().to_string();

    Some(TrapLine {
        tid,
        rip,
        bytes_hex,
        opcode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_write_command() {
        let cmd = parse_command("WRITE 1000 90 90 90").unwrap();
        assert_eq!(cmd.address, 0x1000);
        assert_eq!(cmd.bytes, vec![0x90, 0x90, 0x90]);
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse_command("FOO bar").is_err());
    }

    #[test]
    fn round_trips_trap_line() {
        let line = format_trap_line(42, 0x4010, Some(0x1), &[0x48, 0x89], "mov rax, rbx");
        let parsed = parse_trap_line(&line).unwrap();
        assert_eq!(parsed.tid, 42);
        assert_eq!(parsed.rip, 0x4010);
        assert_eq!(parsed.bytes_hex, "48 89");
        assert_eq!(parsed.opcode, "mov rax, rbx");
    }

    #[test]
    fn parse_tolerates_extra_fields() {
        let line = "tid=7 rip=0x2000 dr6=peek-failed extra=1 bytes=90 inst=nop\n";
        let parsed = parse_trap_line(line).unwrap();
        assert_eq!(parsed.tid, 7);
        assert_eq!(parsed.rip, 0x2000);
        assert_eq!(parsed.bytes_hex, "90");
        assert_eq!(parsed.opcode, "nop");
    }
}
