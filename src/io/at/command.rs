// src/io/at/command.rs
//
// Command-mode handshake for the AT adapter.
//
// Commands are ASCII lines terminated by CR LF:
//   AT+CG                            enter config mode
//   AT+DEFAULT                       restore factory settings (UART back to 9600)
//   AT+USART_PARAM=<baud>,0,0,0      set adapter UART rate
//   AT+CAN_BAUD=<bps>                CAN bitrate
//   AT+CAN_MODE=<0|1>                normal / loopback
//   AT+CAN_FILTER<n>=<en>,<mode>,<filter>,<mask>
//   AT+AT                            leave config mode (back to frame mode)
//
// Every command is answered with a line containing "OK" on success.

use std::time::{Duration, Instant};

use super::line::LineIo;
use crate::io::error::{CanError, Result};
use crate::io::{ChannelConfig, Filter};
use crate::settings::{Settings, FACTORY_LINE_BAUD};

/// Affirmative reply token
pub const REPLY_OK: &str = "OK";

/// Longest reply line accepted before giving up
const MAX_REPLY_LEN: usize = 128;

const REPLY_POLL: Duration = Duration::from_millis(2);

// ============================================================================
// Command Builders
// ============================================================================

pub fn enter_config() -> String {
    "AT+CG".to_string()
}

pub fn factory_default() -> String {
    "AT+DEFAULT".to_string()
}

pub fn usart_param(line_baud: u32) -> String {
    format!("AT+USART_PARAM={},0,0,0", line_baud)
}

pub fn can_baud(baud_rate: u32) -> String {
    format!("AT+CAN_BAUD={}", baud_rate)
}

pub fn can_mode(mode: u8) -> String {
    format!("AT+CAN_MODE={}", mode)
}

pub fn can_filter(filter: &Filter) -> String {
    format!(
        "AT+CAN_FILTER{}={},{},{},{}",
        filter.number,
        if filter.enabled { 1 } else { 0 },
        filter.mode,
        filter.filter_value,
        filter.mask_value
    )
}

pub fn exit_config() -> String {
    "AT+AT".to_string()
}

// ============================================================================
// Line I/O
// ============================================================================

/// Read one CR LF terminated reply line (terminator stripped).
fn read_reply(io: &mut dyn LineIo, timeout: Duration) -> std::io::Result<String> {
    let deadline = Instant::now() + timeout;
    let mut line: Vec<u8> = Vec::with_capacity(16);
    let mut byte = [0u8; 1];

    loop {
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        if line.len() > MAX_REPLY_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "reply line too long",
            ));
        }
        if Instant::now() >= deadline {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply",
            ));
        }

        if io.bytes_to_read()? == 0 {
            std::thread::sleep(REPLY_POLL);
            continue;
        }
        match io.read(&mut byte) {
            Ok(1) => line.push(byte[0]),
            Ok(_) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e),
        }
    }
}

/// Send one command and require an affirmative reply.
pub fn send_command(io: &mut dyn LineIo, command: &str, timeout: Duration, device: &str) -> Result<String> {
    tlog!("[at] {} -> {}", device, command);

    io.write_all(format!("{}\r\n", command).as_bytes())
        .and_then(|_| io.flush())
        .map_err(|e| CanError::io(device, e))?;

    let reply = read_reply(io, timeout)
        .map_err(|e| CanError::configuration(format!("{}: {} ({})", device, command, e)))?;

    if !reply.contains(REPLY_OK) {
        return Err(CanError::configuration(format!(
            "{}: {} rejected: {:?}",
            device, command, reply
        )));
    }
    Ok(reply)
}

fn set_line_baud(io: &mut dyn LineIo, line_baud: u32, device: &str) -> Result<()> {
    io.set_baud_rate(line_baud)
        .map_err(|e| CanError::io(device, e))
}

// ============================================================================
// Handshake
// ============================================================================

/// Find the UART rate the adapter is listening on by entering config mode at
/// each candidate rate in turn.
pub fn negotiate_line_baud(io: &mut dyn LineIo, settings: &Settings, device: &str) -> Result<u32> {
    let timeout = Duration::from_millis(settings.reply_timeout_ms);

    for &candidate in &settings.line_baud_candidates {
        set_line_baud(io, candidate, device)?;
        let _ = io.clear(serialport::ClearBuffer::Input);

        match send_command(io, &enter_config(), timeout, device) {
            Ok(_) => {
                tlog!("[at] {} answered at {} baud", device, candidate);
                return Ok(candidate);
            }
            Err(CanError::ConfigurationFailed(reason)) => {
                tlog!("[at] {} silent at {} baud: {}", device, candidate, reason);
            }
            Err(e) => return Err(e),
        }
    }

    Err(CanError::configuration(format!(
        "{}: adapter did not answer at any of {:?}",
        device, settings.line_baud_candidates
    )))
}

/// Run the full configuration sequence and leave the adapter in frame mode.
///
/// Returns the UART rate the line ends up on. A rejected step aborts the
/// sequence; steps already applied are not rolled back.
pub fn run_handshake(
    io: &mut dyn LineIo,
    config: &ChannelConfig,
    settings: &Settings,
    device: &str,
) -> Result<u32> {
    let timeout = Duration::from_millis(settings.reply_timeout_ms);

    negotiate_line_baud(io, settings, device)?;

    send_command(io, &factory_default(), timeout, device)?;
    set_line_baud(io, FACTORY_LINE_BAUD, device)?;

    let working = settings.working_line_baud;
    send_command(io, &usart_param(working), timeout, device)?;
    set_line_baud(io, working, device)?;

    send_command(io, &can_baud(config.baud_rate), timeout, device)?;
    send_command(io, &can_mode(config.mode), timeout, device)?;
    for filter in &config.filters {
        send_command(io, &can_filter(filter), timeout, device)?;
    }

    send_command(io, &exit_config(), timeout, device)?;
    Ok(working)
}
