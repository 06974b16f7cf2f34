//! Regex based line classifier

use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

use super::value::{decode_value, split_arguments};
use crate::strace::{Header, InstructionPointer, TraceRecord};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub(crate) enum LineError {
    #[error("line matches no known record shape")]
    Unrecognized,
    #[error("field {field:?} is missing or invalid")]
    MalformedCapture { field: &'static str },
}

#[expect(clippy::unwrap_used)]
static SYSCALL_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"
^
(?<timestamp>[0-9]+\.[0-9]+)
\x20
\[(?<address>[0-9A-Fa-f]+)\]
\x20
(?<name>[A-Za-z0-9_]+)
\(
(?<arguments>.*)
\)
\x20=\x20
(?<result>.*)
$
",
    )
    .ignore_whitespace(true)
    .build()
    .unwrap()
});

#[expect(clippy::unwrap_used)]
static EXIT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"
^
(?<timestamp>[0-9]+\.[0-9]+)
\x20
\[\?+\]
\x20
\+{3}\x20(?<message>.*)\x20\+{3}
$
",
    )
    .ignore_whitespace(true)
    .build()
    .unwrap()
});

/// Classify a single line (without terminator) as a syscall or process exit record
pub(crate) fn parse_line(line: &str) -> Result<TraceRecord, LineError> {
    if let Some(caps) = SYSCALL_LINE_REGEX.captures(line) {
        let header = Header {
            timestamp: parse_timestamp(&caps)?,
            instruction_pointer: parse_address(&caps)?,
            raw: line.to_owned(),
        };
        Ok(TraceRecord::Syscall {
            header,
            name: capture(&caps, "name")?.to_owned(),
            arguments: split_arguments(capture(&caps, "arguments")?),
            result: decode_value(capture(&caps, "result")?),
        })
    } else if let Some(caps) = EXIT_LINE_REGEX.captures(line) {
        let header = Header {
            timestamp: parse_timestamp(&caps)?,
            instruction_pointer: InstructionPointer::Unresolved,
            raw: line.to_owned(),
        };
        Ok(TraceRecord::Exit {
            header,
            message: capture(&caps, "message")?.to_owned(),
        })
    } else {
        Err(LineError::Unrecognized)
    }
}

fn capture<'h>(caps: &Captures<'h>, field: &'static str) -> Result<&'h str, LineError> {
    caps.name(field)
        .map(|m| m.as_str())
        .ok_or(LineError::MalformedCapture { field })
}

fn parse_timestamp(caps: &Captures) -> Result<f64, LineError> {
    const FIELD: &str = "timestamp";
    capture(caps, FIELD)?
        .parse()
        .map_err(|_| LineError::MalformedCapture { field: FIELD })
}

fn parse_address(caps: &Captures) -> Result<InstructionPointer, LineError> {
    const FIELD: &str = "address";
    u64::from_str_radix(capture(caps, FIELD)?, 16)
        .map(InstructionPointer::Address)
        .map_err(|_| LineError::MalformedCapture { field: FIELD })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::strace::{Descriptor, Endpoint, SocketAddress, TraceValue};

    fn text(s: &[u8]) -> TraceValue {
        TraceValue::Text {
            decoded: s.to_vec(),
            truncated: false,
        }
    }

    fn header(raw: &str, timestamp: f64, addr: u64) -> Header {
        Header {
            timestamp,
            instruction_pointer: InstructionPointer::Address(addr),
            raw: raw.to_owned(),
        }
    }

    fn local_tcp(fd: i32) -> TraceValue {
        TraceValue::Descriptor(Descriptor {
            fd,
            endpoint: Endpoint::Tcp {
                local: SocketAddress::new("127.0.0.1", 8080),
                remote: SocketAddress::new("127.0.0.1", 33980),
            },
        })
    }

    #[test]
    fn test_write() {
        let _ = simple_logger::SimpleLogger::new().init();

        let line = r#"1590956412.769884 [00007efd9716c1e8] write(1<\x2f\x64\x65\x76\x2f\x70\x74\x73\x2f\x33<char 136:3>>, "\x6f\x6b\x0a", 3) = 3"#;
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Syscall {
                header: header(line, 1_590_956_412.769_884, 0x0000_7efd_9716_c1e8),
                name: "write".to_owned(),
                arguments: vec![
                    TraceValue::Descriptor(Descriptor {
                        fd: 1,
                        endpoint: Endpoint::Unknown
                    }),
                    text(b"ok\n"),
                    TraceValue::Integer(3),
                ],
                result: TraceValue::Integer(3),
            }
        );
    }

    #[test]
    fn test_recvfrom() {
        let _ = simple_logger::SimpleLogger::new().init();

        let line = r#"1590956412.769525 [00007efd9717c301] recvfrom(7<TCP:[127.0.0.1:8080->127.0.0.1:33980]>, "\x6f\x6b\x0a", 8192, 0, NULL, NULL) = 3"#;
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Syscall {
                header: header(line, 1_590_956_412.769_525, 0x0000_7efd_9717_c301),
                name: "recvfrom".to_owned(),
                arguments: vec![
                    local_tcp(7),
                    text(b"ok\n"),
                    TraceValue::Integer(8192),
                    TraceValue::Integer(0),
                    TraceValue::Null,
                    TraceValue::Null,
                ],
                result: TraceValue::Integer(3),
            }
        );
    }

    #[test]
    fn test_close() {
        let _ = simple_logger::SimpleLogger::new().init();

        let line = "1590956413.495544 [00007efd9716c878] close(7<TCP:[127.0.0.1:8080->127.0.0.1:33980]>) = 0";
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Syscall {
                header: header(line, 1_590_956_413.495_544, 0x0000_7efd_9716_c878),
                name: "close".to_owned(),
                arguments: vec![local_tcp(7)],
                result: TraceValue::Integer(0),
            }
        );
    }

    #[test]
    fn test_access() {
        let _ = simple_logger::SimpleLogger::new().init();

        let line = r#"1590956382.908961 [00007efd9716c2bb] access("\x2f\x65\x74\x63\x2f\x73\x79\x73\x74\x65\x6d\x2d\x66\x69\x70\x73", F_OK) = -1 ENOENT (No such file or directory)"#;
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Syscall {
                header: header(line, 1_590_956_382.908_961, 0x0000_7efd_9716_c2bb),
                name: "access".to_owned(),
                arguments: vec![text(b"/etc/system-fips"), TraceValue::Raw("F_OK".to_owned())],
                result: TraceValue::Raw("-1 ENOENT (No such file or directory)".to_owned()),
            }
        );
    }

    #[test]
    fn test_no_arguments() {
        let _ = simple_logger::SimpleLogger::new().init();

        let line = "1590956382.900000 [00007EFD9716C2BB] getpid() = 4242";
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Syscall {
                header: header(line, 1_590_956_382.9, 0x0000_7efd_9716_c2bb),
                name: "getpid".to_owned(),
                arguments: vec![],
                result: TraceValue::Integer(4242),
            }
        );
    }

    #[test]
    fn test_descriptor_result() {
        let _ = simple_logger::SimpleLogger::new().init();

        let TraceRecord::Syscall { result, .. } = parse_line(
            "1590956411.000001 [00007efd9717c0a7] socket(AF_INET, SOCK_STREAM, IPPROTO_IP) = 3<TCP:[127.0.0.1:8080->127.0.0.1:33980]>",
        )
        .unwrap() else {
            panic!("not a syscall");
        };
        assert_eq!(result, local_tcp(3));
    }

    #[test]
    fn test_exit_group() {
        let _ = simple_logger::SimpleLogger::new().init();

        let TraceRecord::Syscall {
            name,
            arguments,
            result,
            ..
        } = parse_line("1590956413.499871 [00007efd9714ee46] exit_group(0) = ?").unwrap()
        else {
            panic!("not a syscall");
        };
        assert_eq!(name, "exit_group");
        assert_eq!(arguments, vec![TraceValue::Integer(0)]);
        assert_eq!(result, TraceValue::Raw("?".to_owned()));
    }

    #[test]
    fn test_exit() {
        let _ = simple_logger::SimpleLogger::new().init();

        let line = "1590956413.5 [????????????????] +++ exited with 0 +++";
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Exit {
                header: Header {
                    timestamp: 1_590_956_413.5,
                    instruction_pointer: InstructionPointer::Unresolved,
                    raw: line.to_owned(),
                },
                message: "exited with 0".to_owned(),
            }
        );

        let line = "1590956414.000100 [????????????????] +++ killed by SIGKILL +++";
        assert_eq!(
            parse_line(line).unwrap(),
            TraceRecord::Exit {
                header: Header {
                    timestamp: 1_590_956_414.000_1,
                    instruction_pointer: InstructionPointer::Unresolved,
                    raw: line.to_owned(),
                },
                message: "killed by SIGKILL".to_owned(),
            }
        );
    }

    #[test]
    fn test_unrecognized() {
        let _ = simple_logger::SimpleLogger::new().init();

        for line in [
            "garbage line not matching any shape",
            "",
            // Placeholder address on a syscall, hex address on an exit
            "1590956413.5 [????????????????] close(3) = 0",
            "1590956413.5 [00007efd9714ee46] +++ exited with 0 +++",
            // Signal delivery
            "1590956413.5 [00007efd9714ee46] --- SIGCHLD {si_signo=SIGCHLD} ---",
            // Missing fractional timestamp part
            "1590956413 [00007efd9714ee46] close(3) = 0",
        ] {
            assert_eq!(parse_line(line), Err(LineError::Unrecognized), "{line:?}");
        }
    }

    #[test]
    fn test_address_overflow() {
        let _ = simple_logger::SimpleLogger::new().init();

        assert_eq!(
            parse_line("1590956413.5 [100007efd9714ee46] close(3) = 0"),
            Err(LineError::MalformedCapture { field: "address" })
        );
    }

    #[test]
    fn test_header_reserialization() {
        let _ = simple_logger::SimpleLogger::new().init();

        for line in [
            "1590956412.769884 [00007efd9716c1e8] write(1<\\x2f>, \"\\x6f\", 1) = 1",
            "1590956413.495544 [00007efd9716c878] close(7<TCP:[127.0.0.1:8080->127.0.0.1:33980]>) = 0",
            "1590956382.000001 [0000000000000000] getpid() = 1",
            // Uppercase hex, short fraction, 32 bit address
            "1590956382.900000 [00007EFD9716C2BB] getpid() = 4242",
            "1590956382.9 [00007efd9716c2bb] getpid() = 4242",
            "1590956382.908961 [b7f1c2a0] getpid() = 4242",
        ] {
            let record = parse_line(line).unwrap();
            let TraceRecord::Syscall { header, name, .. } = &record else {
                panic!("not a syscall");
            };
            assert_eq!(header.raw, line);
            assert!(
                line.starts_with(&format!("{header} {name}(")),
                "{line:?} != {header} {name}"
            );
        }

        let line = "1590956413.5 [????????] +++ exited with 0 +++";
        let record = parse_line(line).unwrap();
        assert_eq!(record.header().raw, line);
        assert_eq!(record.header().to_string(), "1590956413.5 [????????]");
    }
}
