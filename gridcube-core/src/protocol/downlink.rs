use serde::{Deserialize, Serialize};

use super::MAX_FRAME_SIZE;
use super::byte_order::{ByteOrder, FieldReader};
use super::duration::{MAX_DURATION_SECS, compress_duration};
use super::error::{DecodeError, DecodeResult, ValidationError};
use crate::GpsTime;

// command frame: tag(1) + gps_time(4) + parameters

/// Units sentinel meaning "no effect" for an advanced load-up.
pub const NO_EFFECT_UNITS: u8 = 0xFF;

const TIMESTAMP_OFFSET: usize = 1;
const PARAMS_OFFSET: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    LoadUp = 0,
    GridEmergency = 1,
    CriticalPeak = 2,
    StartShed = 3,
    EndShed = 4,
    InformationRequest = 5,
    CustomerOverride = 6,
    SetBitmap = 7,
    SetUtcTime = 8,
    GetUtcTime = 9,
    RequestConnectionInfo = 10,
    SetAdvancedLoadUp = 11,
    StartDataPublish = 12,
}

impl TryFrom<u8> for CommandType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CommandType::LoadUp),
            1 => Ok(CommandType::GridEmergency),
            2 => Ok(CommandType::CriticalPeak),
            3 => Ok(CommandType::StartShed),
            4 => Ok(CommandType::EndShed),
            5 => Ok(CommandType::InformationRequest),
            6 => Ok(CommandType::CustomerOverride),
            7 => Ok(CommandType::SetBitmap),
            8 => Ok(CommandType::SetUtcTime),
            9 => Ok(CommandType::GetUtcTime),
            10 => Ok(CommandType::RequestConnectionInfo),
            11 => Ok(CommandType::SetAdvancedLoadUp),
            12 => Ok(CommandType::StartDataPublish),
            _ => Err(DecodeError::UnsupportedType(value)),
        }
    }
}

impl CommandType {
    pub const ALL: [CommandType; 13] = [
        CommandType::LoadUp,
        CommandType::GridEmergency,
        CommandType::CriticalPeak,
        CommandType::StartShed,
        CommandType::EndShed,
        CommandType::InformationRequest,
        CommandType::CustomerOverride,
        CommandType::SetBitmap,
        CommandType::SetUtcTime,
        CommandType::GetUtcTime,
        CommandType::RequestConnectionInfo,
        CommandType::SetAdvancedLoadUp,
        CommandType::StartDataPublish,
    ];

    /// Byte order of the timestamp field.
    ///
    /// SetBitmap and SetUtcTime were first shipped writing big-endian and
    /// deployed firmware expects exactly that. Every other command is
    /// little-endian.
    pub const fn timestamp_order(self) -> ByteOrder {
        match self {
            CommandType::SetBitmap | CommandType::SetUtcTime => ByteOrder::Big,
            _ => ByteOrder::Little,
        }
    }

    pub const fn frame_len(self) -> usize {
        match self {
            CommandType::EndShed
            | CommandType::InformationRequest
            | CommandType::SetUtcTime
            | CommandType::GetUtcTime
            | CommandType::RequestConnectionInfo => 5,
            CommandType::LoadUp
            | CommandType::GridEmergency
            | CommandType::CriticalPeak
            | CommandType::StartShed
            | CommandType::CustomerOverride => 6,
            CommandType::StartDataPublish => 7,
            CommandType::SetBitmap | CommandType::SetAdvancedLoadUp => 9,
        }
    }
}

/// Downlink command parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    LoadUp {
        duration_secs: u32,
    },
    GridEmergency {
        duration_secs: u32,
    },
    CriticalPeak {
        duration_secs: u32,
    },
    StartShed {
        duration_secs: u32,
    },
    EndShed,
    InformationRequest,
    CustomerOverride {
        enabled: bool,
    },
    SetBitmap {
        bitmap: u32,
    },
    /// Sets the device clock to the request timestamp.
    SetUtcTime,
    GetUtcTime,
    RequestConnectionInfo,
    SetAdvancedLoadUp {
        duration_secs: u32,
        value: u32,
        units: u8,
    },
    StartDataPublish {
        interval_secs: u32,
    },
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::LoadUp { .. } => CommandType::LoadUp,
            Command::GridEmergency { .. } => CommandType::GridEmergency,
            Command::CriticalPeak { .. } => CommandType::CriticalPeak,
            Command::StartShed { .. } => CommandType::StartShed,
            Command::EndShed => CommandType::EndShed,
            Command::InformationRequest => CommandType::InformationRequest,
            Command::CustomerOverride { .. } => CommandType::CustomerOverride,
            Command::SetBitmap { .. } => CommandType::SetBitmap,
            Command::SetUtcTime => CommandType::SetUtcTime,
            Command::GetUtcTime => CommandType::GetUtcTime,
            Command::RequestConnectionInfo => CommandType::RequestConnectionInfo,
            Command::SetAdvancedLoadUp { .. } => CommandType::SetAdvancedLoadUp,
            Command::StartDataPublish { .. } => CommandType::StartDataPublish,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            Command::LoadUp { duration_secs }
            | Command::GridEmergency { duration_secs }
            | Command::CriticalPeak { duration_secs }
            | Command::StartShed { duration_secs } => check_duration(duration_secs),
            Command::SetAdvancedLoadUp {
                duration_secs,
                value,
                units,
            } => {
                check_duration(duration_secs)?;
                if !(units <= 0x03 || units == NO_EFFECT_UNITS) {
                    return Err(ValidationError::InvalidUnits(units));
                }
                if value > u32::from(u16::MAX) {
                    return Err(ValidationError::ValueOutOfRange(value));
                }
                if value == 0 && units != NO_EFFECT_UNITS {
                    return Err(ValidationError::ZeroValueNeedsNoEffectUnits(units));
                }
                Ok(())
            }
            Command::StartDataPublish { interval_secs } => {
                if interval_secs > u32::from(u16::MAX) {
                    return Err(ValidationError::IntervalTooLong(interval_secs));
                }
                Ok(())
            }
            Command::EndShed
            | Command::InformationRequest
            | Command::CustomerOverride { .. }
            | Command::SetBitmap { .. }
            | Command::SetUtcTime
            | Command::GetUtcTime
            | Command::RequestConnectionInfo => Ok(()),
        }
    }
}

fn check_duration(secs: u32) -> Result<(), ValidationError> {
    if secs > MAX_DURATION_SECS {
        return Err(ValidationError::DurationTooLong {
            secs,
            max: MAX_DURATION_SECS,
        });
    }
    Ok(())
}

/// A command bound to the GPS timestamp it will carry on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: Command,
    /// Start time for scheduled commands, the time to set for SetUtcTime,
    /// and the correlation key echoed by the device's acknowledgment.
    pub gps_time: GpsTime,
}

impl CommandRequest {
    pub fn new(command: Command, gps_time: GpsTime) -> Self {
        Self { command, gps_time }
    }
}

/// Encodes a command frame. Parameters are validated first; no bytes are
/// produced for an invalid request.
pub fn encode(request: &CommandRequest) -> Result<Vec<u8>, ValidationError> {
    request.command.validate()?;

    let command_type = request.command.command_type();
    let mut frame = Vec::with_capacity(MAX_FRAME_SIZE);

    frame.push(command_type as u8);
    frame.extend_from_slice(&command_type.timestamp_order().u32_to(request.gps_time.0));

    match request.command {
        Command::LoadUp { duration_secs }
        | Command::GridEmergency { duration_secs }
        | Command::CriticalPeak { duration_secs }
        | Command::StartShed { duration_secs } => {
            frame.push(compress_duration(duration_secs));
        }
        Command::CustomerOverride { enabled } => {
            frame.push(u8::from(enabled));
        }
        Command::SetBitmap { bitmap } => {
            frame.extend_from_slice(&ByteOrder::Little.u32_to(bitmap));
        }
        Command::SetAdvancedLoadUp {
            duration_secs,
            value,
            units,
        } => {
            frame.push(compress_duration(duration_secs));
            // validated above to fit in u16
            frame.extend_from_slice(&ByteOrder::Little.u16_to(value as u16));
            frame.push(units);
        }
        Command::StartDataPublish { interval_secs } => {
            frame.extend_from_slice(&ByteOrder::Little.u16_to(interval_secs as u16));
        }
        Command::EndShed
        | Command::InformationRequest
        | Command::SetUtcTime
        | Command::GetUtcTime
        | Command::RequestConnectionInfo => {}
    }

    debug_assert_eq!(frame.len(), command_type.frame_len());
    Ok(frame)
}

/// The part of a command a device echoes back in its acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckFields {
    pub command_type: CommandType,
    pub gps_time: GpsTime,
}

impl AckFields {
    /// Builds the key from an EventAcknowledgment uplink's fields.
    pub fn from_event_ack(event_type: u8, gps_time: GpsTime) -> DecodeResult<Self> {
        Ok(Self {
            command_type: CommandType::try_from(event_type)?,
            gps_time,
        })
    }
}

/// Recovers the tag and timestamp from an encoded command frame.
pub fn decode_ack_fields(frame: &[u8]) -> DecodeResult<AckFields> {
    let r = FieldReader::new(frame, PARAMS_OFFSET)?;
    let command_type = CommandType::try_from(r.u8(0)?)?;
    let gps_time = command_type
        .timestamp_order()
        .u32_from(r.array(TIMESTAMP_OFFSET)?);

    Ok(AckFields {
        command_type,
        gps_time: GpsTime(gps_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(command_type: CommandType) -> Command {
        match command_type {
            CommandType::LoadUp => Command::LoadUp { duration_secs: 1800 },
            CommandType::GridEmergency => Command::GridEmergency { duration_secs: 600 },
            CommandType::CriticalPeak => Command::CriticalPeak { duration_secs: 7200 },
            CommandType::StartShed => Command::StartShed { duration_secs: 3600 },
            CommandType::EndShed => Command::EndShed,
            CommandType::InformationRequest => Command::InformationRequest,
            CommandType::CustomerOverride => Command::CustomerOverride { enabled: true },
            CommandType::SetBitmap => Command::SetBitmap { bitmap: 0x0000_00F0 },
            CommandType::SetUtcTime => Command::SetUtcTime,
            CommandType::GetUtcTime => Command::GetUtcTime,
            CommandType::RequestConnectionInfo => Command::RequestConnectionInfo,
            CommandType::SetAdvancedLoadUp => Command::SetAdvancedLoadUp {
                duration_secs: 3600,
                value: 500,
                units: 0x01,
            },
            CommandType::StartDataPublish => Command::StartDataPublish { interval_secs: 300 },
        }
    }

    #[test]
    fn ack_fields_round_trip_for_every_command() {
        for command_type in CommandType::ALL {
            let request = CommandRequest::new(sample(command_type), GpsTime(1_357_000_000));
            let frame = encode(&request).unwrap();

            assert_eq!(frame[0], command_type as u8);
            assert_eq!(frame.len(), command_type.frame_len());
            assert_eq!(
                decode_ack_fields(&frame),
                Ok(AckFields {
                    command_type,
                    gps_time: GpsTime(1_357_000_000),
                })
            );
        }
    }

    #[test]
    fn start_shed_layout() {
        let frame = encode(&CommandRequest::new(
            Command::StartShed { duration_secs: 3600 },
            GpsTime(0x0102_0304),
        ))
        .unwrap();

        assert_eq!(frame, vec![3, 0x04, 0x03, 0x02, 0x01, 42]);
    }

    #[test]
    fn legacy_timestamps_are_big_endian() {
        let set_time =
            encode(&CommandRequest::new(Command::SetUtcTime, GpsTime(0x0102_0304))).unwrap();
        assert_eq!(set_time, vec![8, 0x01, 0x02, 0x03, 0x04]);

        let bitmap = encode(&CommandRequest::new(
            Command::SetBitmap { bitmap: 0x0A0B_0C0D },
            GpsTime(0x0102_0304),
        ))
        .unwrap();
        assert_eq!(bitmap, vec![7, 0x01, 0x02, 0x03, 0x04, 0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn advanced_load_up_layout() {
        let frame = encode(&CommandRequest::new(
            Command::SetAdvancedLoadUp {
                duration_secs: 7200,
                value: 0x1234,
                units: 0x02,
            },
            GpsTime(1),
        ))
        .unwrap();

        assert_eq!(frame, vec![11, 1, 0, 0, 0, 60, 0x34, 0x12, 0x02]);
    }

    #[test]
    fn zero_value_requires_no_effect_units() {
        let rejected = Command::SetAdvancedLoadUp {
            duration_secs: 60,
            value: 0,
            units: 0x01,
        };
        assert_eq!(
            encode(&CommandRequest::new(rejected, GpsTime(1))),
            Err(ValidationError::ZeroValueNeedsNoEffectUnits(0x01))
        );

        let accepted = Command::SetAdvancedLoadUp {
            duration_secs: 60,
            value: 0,
            units: NO_EFFECT_UNITS,
        };
        assert!(encode(&CommandRequest::new(accepted, GpsTime(1))).is_ok());
    }

    #[test]
    fn advanced_load_up_ranges() {
        for units in [0x04u8, 0x10, 0xFE] {
            let command = Command::SetAdvancedLoadUp {
                duration_secs: 60,
                value: 10,
                units,
            };
            assert_eq!(command.validate(), Err(ValidationError::InvalidUnits(units)));
        }

        let too_big = Command::SetAdvancedLoadUp {
            duration_secs: 60,
            value: 0x1_0000,
            units: 0x00,
        };
        assert_eq!(too_big.validate(), Err(ValidationError::ValueOutOfRange(0x1_0000)));

        let max = Command::SetAdvancedLoadUp {
            duration_secs: 60,
            value: 0xFFFF,
            units: 0x03,
        };
        assert_eq!(max.validate(), Ok(()));
    }

    #[test]
    fn overlong_durations_fail_before_encoding() {
        let request = CommandRequest::new(
            Command::LoadUp {
                duration_secs: MAX_DURATION_SECS + 1,
            },
            GpsTime(1),
        );
        assert!(matches!(
            encode(&request),
            Err(ValidationError::DurationTooLong { .. })
        ));
    }

    #[test]
    fn ack_fields_from_device_ack() {
        assert_eq!(
            AckFields::from_event_ack(3, GpsTime(99)),
            Ok(AckFields {
                command_type: CommandType::StartShed,
                gps_time: GpsTime(99),
            })
        );
        assert_eq!(
            AckFields::from_event_ack(200, GpsTime(99)),
            Err(DecodeError::UnsupportedType(200))
        );
    }

    #[test]
    fn ack_fields_reject_short_frames() {
        assert!(matches!(
            decode_ack_fields(&[3, 0, 0]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn command_json_shape() {
        let command: Command =
            serde_json::from_str(r#"{"type":"StartShed","duration_secs":900}"#).unwrap();
        assert_eq!(command, Command::StartShed { duration_secs: 900 });

        let command: Command = serde_json::from_str(r#"{"type":"EndShed"}"#).unwrap();
        assert_eq!(command.command_type(), CommandType::EndShed);
    }
}
