//! Lexes textual parameter commands of the form `PTYPE<PID>=<VALUE>` and
//! assigns each one its normalized business key and target device channel.

use bridge_common::Channel;
use thiserror::Error;

/// Either a read request (`...=?`) or a write with its literal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandValue {
    Read,
    Write(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub ptype: String,
    pub pid: String,
    pub value: CommandValue,
    pub pkey: String,
    pub channel: Channel,
}

/// A sub-command failed to parse. `pkey` carries whatever PTYPE+PID could be
/// recovered before the failure, so the caller can still emit a keyed NAK.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error in {raw:?}")]
pub struct ParseError {
    pub raw: String,
    pub pkey: Option<String>,
}

/// Split a multi-command input on commas, semicolons, or newlines, trimming
/// whitespace and dropping empty segments.
pub fn split_commands(input: &str) -> Vec<String> {
    input
        .split([',', ';', '\n'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Zero-pad a digits-only PID per the channel-specific width table. Non-digit
/// PIDs and PTYPEs outside the table pass through unchanged.
pub fn normalize_pid(ptype: &str, pid: &str) -> String {
    if !pid.chars().all(|c| c.is_ascii_digit()) {
        return pid.to_string();
    }
    let width = match ptype {
        "TTP" => 5,
        "TTE" | "TTW" | "MAP" | "MAS" | "MAE" | "MAW" | "LSE" | "LSW" => 4,
        _ => return pid.to_string(),
    };
    format!("{:0>width$}", pid, width = width)
}

/// Map a normalized PTYPE's first two letters to a device channel.
pub fn route_channel(ptype: &str) -> Channel {
    match &ptype[..2.min(ptype.len())] {
        "TT" => Channel::Vj6530,
        "LS" => Channel::Vj3350,
        "MA" => Channel::EspPlc,
        _ => Channel::Raspi,
    }
}

fn is_valid_pid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_valid_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Parse a single `PTYPE<PID>=<VALUE>` sub-command.
pub fn parse_command(raw: &str) -> Result<ParsedCommand, ParseError> {
    let err = |pkey: Option<String>| ParseError {
        raw: raw.to_string(),
        pkey,
    };

    let eq_pos = raw.find('=').ok_or_else(|| err(None))?;
    let (key_part, value_part) = raw.split_at(eq_pos);
    let value_part = &value_part[1..]; // drop '='

    if key_part.len() < 4 {
        return Err(err(None));
    }
    let (ptype_raw, pid_raw) = key_part.split_at(3);
    if !ptype_raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(err(None));
    }
    if pid_raw.is_empty() || !pid_raw.chars().all(is_valid_pid_char) {
        return Err(err(None));
    }

    let ptype = ptype_raw.to_ascii_uppercase();
    let pid = normalize_pid(&ptype, pid_raw);
    let pkey = format!("{ptype}{pid}");

    if value_part == "?" {
        return Ok(ParsedCommand {
            ptype: ptype.clone(),
            pid,
            value: CommandValue::Read,
            channel: route_channel(&ptype),
            pkey,
        });
    }

    let (sign, digits) = match value_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", value_part),
    };
    if digits.is_empty() || !digits.chars().all(is_valid_value_char) {
        return Err(err(Some(pkey)));
    }

    Ok(ParsedCommand {
        ptype: ptype.clone(),
        pid,
        value: CommandValue::Write(format!("{sign}{digits}")),
        channel: route_channel(&ptype),
        pkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_commands_multiple_separators() {
        let cmds = split_commands("TTP2=23, TTP3=10;LSE1=?\nMAP1=5");
        assert_eq!(cmds, vec!["TTP2=23", "TTP3=10", "LSE1=?", "MAP1=5"]);
    }

    #[test]
    fn test_normalize_pid_ttp_pads_to_five() {
        assert_eq!(normalize_pid("TTP", "2"), "00002");
    }

    #[test]
    fn test_normalize_pid_four_digit_group() {
        assert_eq!(normalize_pid("LSE", "7"), "0007");
        assert_eq!(normalize_pid("MAS", "42"), "0042");
    }

    #[test]
    fn test_normalize_pid_unaffected_ptype_unchanged() {
        assert_eq!(normalize_pid("ZZZ", "7"), "7");
    }

    #[test]
    fn test_normalize_pid_non_numeric_passthrough() {
        assert_eq!(normalize_pid("TTP", "ABC"), "ABC");
    }

    #[test]
    fn test_route_channel_prefixes() {
        assert_eq!(route_channel("TTP"), Channel::Vj6530);
        assert_eq!(route_channel("LSE"), Channel::Vj3350);
        assert_eq!(route_channel("MAS"), Channel::EspPlc);
        assert_eq!(route_channel("XYZ"), Channel::Raspi);
    }

    #[test]
    fn test_parse_read_round_trip() {
        let parsed = parse_command("TTP2=?").unwrap();
        assert_eq!(parsed.pkey, "TTP00002");
        assert_eq!(parsed.value, CommandValue::Read);
        assert_eq!(parsed.channel, Channel::Vj6530);
    }

    #[test]
    fn test_parse_write() {
        let parsed = parse_command("TTP00002=23").unwrap();
        assert_eq!(parsed.pkey, "TTP00002");
        assert_eq!(parsed.value, CommandValue::Write("23".to_string()));
    }

    #[test]
    fn test_parse_negative_value() {
        let parsed = parse_command("MAS1=-5").unwrap();
        assert_eq!(parsed.value, CommandValue::Write("-5".to_string()));
    }

    #[test]
    fn test_parse_missing_equals_has_no_pkey() {
        let err = parse_command("garbage").unwrap_err();
        assert!(err.pkey.is_none());
    }

    #[test]
    fn test_parse_bad_value_recovers_pkey() {
        let err = parse_command("TTP2=!!!").unwrap_err();
        assert_eq!(err.pkey, Some("TTP00002".to_string()));
    }

    #[test]
    fn test_parse_whitespace_inside_token_rejected() {
        assert!(parse_command("TTP 2=23").is_err());
    }
}
