//! GB28181 session plumbing
//!
//! ## Responsibilities
//!
//! - Channel code derivation from the 20-digit platform device id
//! - SSRC derivation (last ten digits of the channel code)
//! - SessionSource seam: the SIP stack lives behind it and only tells
//!   us to start or stop pushing a channel to a destination
//!
//! The signalling itself (REGISTER, keepalive, INVITE/BYE, catalog
//! responses) is handled out of process; commands arrive already
//! resolved to a channel code and an RTP destination.

use crate::config_store::{ConfigStore, Gb28181Config};
use crate::error::Result;
use crate::muxer::PushTarget;
use crate::supervisor::ChannelManager;
use std::sync::Arc;

/// Type code for front-end device channels in the national standard
const CHANNEL_TYPE_CODE: &str = "131";

/// Command delivered by the signalling front end
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Begin pushing the named channel to the RTP destination
    Start {
        channel_code: String,
        dest_ip: String,
        dest_port: u16,
        ssrc: String,
    },
    /// Tear down the push for the named channel
    Stop { channel_code: String },
}

/// Seam for whatever delivers session commands (SIP stack, test driver)
pub trait SessionSource: Send {
    /// Blocks until the next command or returns None when the source
    /// has shut down
    fn next_command(&mut self) -> Option<SessionCommand>;
}

/// Channel code for one local channel: device id prefix (10) + type
/// code (3) + zero-padded channel index (4) + device id suffix (3)
pub fn channel_code(config: &Gb28181Config, channel_id: i64) -> Result<String> {
    let device_id = &config.device_id;
    if device_id.len() != 20 || !device_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(crate::Error::Validation(format!(
            "device_id must be 20 digits, got {:?}",
            device_id
        )));
    }
    if !(0..=9999).contains(&channel_id) {
        return Err(crate::Error::Validation(format!(
            "channel id {channel_id} does not fit a 4-digit channel index"
        )));
    }
    Ok(format!(
        "{}{}{:04}{}",
        &device_id[..10],
        CHANNEL_TYPE_CODE,
        channel_id,
        &device_id[17..]
    ))
}

/// Recover the local channel id from a channel code we issued.
/// Returns None for codes that are not ours (wrong length, wrong type
/// code, non-numeric index).
pub fn parse_channel_code(config: &Gb28181Config, code: &str) -> Option<i64> {
    if code.len() != 20 || config.device_id.len() != 20 {
        return None;
    }
    if code[..10] != config.device_id[..10] || &code[10..13] != CHANNEL_TYPE_CODE {
        return None;
    }
    if code[17..] != config.device_id[17..] {
        return None;
    }
    code[13..17].parse::<i64>().ok()
}

/// SSRC for a session: the last ten digits of the channel code
pub fn derive_ssrc(channel_code: &str) -> String {
    if channel_code.len() >= 10 {
        channel_code[channel_code.len() - 10..].to_string()
    } else {
        channel_code.to_string()
    }
}

/// Resolve a start command into a mux target using the configured
/// stream mode
pub fn push_target(config: &Gb28181Config, command: &SessionCommand) -> Option<PushTarget> {
    match command {
        SessionCommand::Start {
            dest_ip,
            dest_port,
            ssrc,
            ..
        } => Some(PushTarget::Rtp {
            dest_ip: dest_ip.clone(),
            dest_port: *dest_port,
            ssrc: ssrc.clone(),
            ps_mode: config.stream_mode.eq_ignore_ascii_case("PS"),
        }),
        SessionCommand::Stop { .. } => None,
    }
}

/// Routes session commands from a signalling front end onto the
/// running channel supervisors
pub struct SessionRouter {
    config_store: Arc<ConfigStore>,
    channels: Arc<ChannelManager>,
}

impl SessionRouter {
    pub fn new(config_store: Arc<ConfigStore>, channels: Arc<ChannelManager>) -> Self {
        Self {
            config_store,
            channels,
        }
    }

    /// Apply one command. Returns false when the command could not be
    /// routed (unparseable code or channel not running).
    pub fn handle(&self, command: SessionCommand) -> bool {
        let config = self.config_store.cached_gb28181_config_blocking();
        let code = match &command {
            SessionCommand::Start { channel_code, .. } => channel_code,
            SessionCommand::Stop { channel_code } => channel_code,
        };

        let channel_id = match parse_channel_code(&config, code) {
            Some(id) => id,
            None => {
                tracing::warn!(channel_code = %code, "Session command for unknown channel code");
                return false;
            }
        };

        let target = push_target(&config, &command);
        let routed = self.channels.set_rtp_target(channel_id, target.clone());
        if routed {
            tracing::info!(
                channel_id,
                active = target.is_some(),
                "Session command routed"
            );
        } else {
            tracing::warn!(channel_id, "Session command for channel with no supervisor");
        }
        routed
    }

    /// Consume a command source until it shuts down. Meant to run on
    /// its own thread next to the SIP stack.
    pub fn drive(&self, mut source: Box<dyn SessionSource>) {
        while let Some(command) = source.next_command() {
            self.handle(command);
        }
        tracing::info!("Session source closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Gb28181Config {
        Gb28181Config {
            device_id: "34020000001320000001".to_string(),
            ..Gb28181Config::default()
        }
    }

    #[test]
    fn test_channel_code_layout() {
        let code = channel_code(&config(), 1).unwrap();
        assert_eq!(code.len(), 20);
        assert_eq!(&code[..10], "3402000000");
        assert_eq!(&code[10..13], "131");
        assert_eq!(&code[13..17], "0001");
        assert_eq!(&code[17..], "001");
    }

    #[test]
    fn test_channel_code_rejects_bad_device_id() {
        let mut cfg = config();
        cfg.device_id = "short".to_string();
        assert!(channel_code(&cfg, 1).is_err());

        cfg.device_id = "3402000000132000000X".to_string();
        assert!(channel_code(&cfg, 1).is_err());
    }

    #[test]
    fn test_channel_code_round_trip() {
        let cfg = config();
        for id in [0, 1, 42, 9999] {
            let code = channel_code(&cfg, id).unwrap();
            assert_eq!(parse_channel_code(&cfg, &code), Some(id));
        }
        assert!(channel_code(&cfg, 10000).is_err());
    }

    #[test]
    fn test_parse_rejects_foreign_codes() {
        let cfg = config();
        // wrong type code
        assert_eq!(parse_channel_code(&cfg, "34020000001320001001"), None);
        // wrong prefix
        assert_eq!(parse_channel_code(&cfg, "99020000001310001001"), None);
        assert_eq!(parse_channel_code(&cfg, "tooshort"), None);
    }

    #[test]
    fn test_ssrc_is_code_suffix() {
        let cfg = config();
        let code = channel_code(&cfg, 7).unwrap();
        let ssrc = derive_ssrc(&code);
        assert_eq!(ssrc.len(), 10);
        assert_eq!(ssrc, code[10..]);
    }

    #[test]
    fn test_push_target_respects_stream_mode() {
        let mut cfg = config();
        cfg.stream_mode = "PS".to_string();
        let start = SessionCommand::Start {
            channel_code: channel_code(&cfg, 1).unwrap(),
            dest_ip: "192.168.1.50".to_string(),
            dest_port: 30000,
            ssrc: "1310001001".to_string(),
        };

        match push_target(&cfg, &start) {
            Some(PushTarget::Rtp { ps_mode, .. }) => assert!(ps_mode),
            other => panic!("unexpected target: {other:?}"),
        }

        cfg.stream_mode = "H264".to_string();
        match push_target(&cfg, &start) {
            Some(PushTarget::Rtp { ps_mode, .. }) => assert!(!ps_mode),
            other => panic!("unexpected target: {other:?}"),
        }

        let stop = SessionCommand::Stop {
            channel_code: "x".to_string(),
        };
        assert!(push_target(&cfg, &stop).is_none());
    }
}
