//! Combinator based decoders for syscall arguments and return values

use nom::{
    IResult, Parser as _,
    branch::alt,
    bytes::complete::{tag, take_while_m_n},
    character::complete::{self, anychar, char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, rest, verify},
    multi::fold_many0,
    sequence::{delimited, preceded, separated_pair},
};

use crate::strace::{Descriptor, Endpoint, SocketAddress, TraceValue};

type Decoder = fn(&str) -> Option<TraceValue>;

/// Tried in order, first match wins
const DECODERS: [Decoder; 5] = [
    decode_integer,
    decode_null,
    decode_string,
    decode_descriptor,
    decode_descriptor_list,
];

/// Decode a single argument or return value token, falling back to the raw text
pub(super) fn decode_value(token: &str) -> TraceValue {
    DECODERS
        .iter()
        .find_map(|decode| decode(token))
        .unwrap_or_else(|| TraceValue::Raw(token.to_owned()))
}

/// Split the text between the syscall parentheses and decode each argument
pub(super) fn split_arguments(text: &str) -> Vec<TraceValue> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(", ").map(decode_value).collect()
}

/// Run parser on the whole token, any leftover input is a non match
fn parse_whole<'a, O>(parser: fn(&'a str) -> IResult<&'a str, O>, token: &'a str) -> Option<O> {
    all_consuming(parser)
        .parse(token)
        .ok()
        .map(|(_rem, output)| output)
}

// Scalars

fn decode_integer(token: &str) -> Option<TraceValue> {
    parse_whole(parse_integer, token).map(TraceValue::Integer)
}

fn decode_null(token: &str) -> Option<TraceValue> {
    (token == "NULL").then_some(TraceValue::Null)
}

fn decode_string(token: &str) -> Option<TraceValue> {
    if !token.starts_with('"') {
        return None;
    }
    let (body, truncated) = match token.strip_suffix("\"...") {
        // In '"...', the opening quote is also the closing one
        Some(quoted) => (quoted.strip_prefix('"').unwrap_or(quoted), true),
        None => (token.strip_prefix('"')?.strip_suffix('"')?, false),
    };
    let decoded = parse_whole(parse_string_body, body)?;
    Some(TraceValue::Text { decoded, truncated })
}

#[function_name::named]
fn parse_integer(i: &str) -> IResult<&str, i64> {
    dbg_parser!(i);
    map_res(recognize((opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })
    .parse(i)
}

enum StringFragment {
    Byte(u8),
    Char(char),
}

#[function_name::named]
fn parse_string_body(i: &str) -> IResult<&str, Vec<u8>> {
    dbg_parser!(i);
    fold_many0(
        alt((
            map(parse_escaped_byte, StringFragment::Byte),
            map(anychar, StringFragment::Char),
        )),
        Vec::new,
        |mut buf, fragment| {
            match fragment {
                StringFragment::Byte(b) => buf.push(b),
                StringFragment::Char(c) => {
                    let mut utf8 = [0; 4];
                    buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                }
            }
            buf
        },
    )
    .parse(i)
}

/// '\x' followed by exactly 2 hex digits, further hex digits are plain characters
#[function_name::named]
fn parse_escaped_byte(i: &str) -> IResult<&str, u8> {
    dbg_parser!(i);
    preceded(
        tag("\\x"),
        map_res(
            take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
            |h: &str| u8::from_str_radix(h, 16),
        ),
    )
    .parse(i)
}

// Descriptors

fn decode_descriptor(token: &str) -> Option<TraceValue> {
    parse_whole(parse_descriptor, token).map(TraceValue::Descriptor)
}

/// '[fd<...> fd<...>]', all elements must be valid descriptors
fn decode_descriptor_list(token: &str) -> Option<TraceValue> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    inner
        .split(' ')
        .map(|t| parse_whole(parse_descriptor, t))
        .collect::<Option<Vec<_>>>()
        .map(TraceValue::DescriptorList)
}

#[function_name::named]
fn parse_descriptor(i: &str) -> IResult<&str, Descriptor> {
    dbg_parser!(i);
    // Socket payloads first, the opaque form would accept them too
    alt((all_consuming(parse_descriptor_socket), parse_descriptor_opaque)).parse(i)
}

#[function_name::named]
fn parse_descriptor_socket(i: &str) -> IResult<&str, Descriptor> {
    dbg_parser!(i);
    map(
        (
            parse_fd,
            delimited(
                char('<'),
                alt((parse_endpoint_tcp, parse_endpoint_unix)),
                char('>'),
            ),
        ),
        |(fd, endpoint)| Descriptor { fd, endpoint },
    )
    .parse(i)
}

#[function_name::named]
fn parse_descriptor_opaque(i: &str) -> IResult<&str, Descriptor> {
    dbg_parser!(i);
    map(
        (
            parse_fd,
            verify(preceded(char('<'), rest), |payload: &str| {
                payload.ends_with('>')
            }),
        ),
        |(fd, _payload)| Descriptor {
            fd,
            endpoint: Endpoint::Unknown,
        },
    )
    .parse(i)
}

#[function_name::named]
fn parse_fd(i: &str) -> IResult<&str, i32> {
    dbg_parser!(i);
    map_res(recognize((opt(char('-')), digit1)), |s: &str| {
        s.parse::<i32>()
    })
    .parse(i)
}

#[function_name::named]
fn parse_endpoint_tcp(i: &str) -> IResult<&str, Endpoint> {
    dbg_parser!(i);
    map(
        delimited(
            tag("TCP:["),
            separated_pair(parse_socket_address, tag("->"), parse_socket_address),
            char(']'),
        ),
        |(local, remote)| Endpoint::Tcp { local, remote },
    )
    .parse(i)
}

#[function_name::named]
fn parse_endpoint_unix(i: &str) -> IResult<&str, Endpoint> {
    dbg_parser!(i);
    map(
        delimited(
            (
                // Longest labels first, 'UNIX' is a prefix of the others
                alt((
                    tag("UNIX-STREAM"),
                    tag("UNIX-DGRAM"),
                    tag("UNIX-SEQPACKET"),
                    tag("UNIX"),
                )),
                tag(":["),
            ),
            separated_pair(complete::u64, tag("->"), complete::u64),
            char(']'),
        ),
        |(local_inode, peer_inode)| Endpoint::Unix {
            local_inode,
            peer_inode,
        },
    )
    .parse(i)
}

#[function_name::named]
fn parse_socket_address(i: &str) -> IResult<&str, SocketAddress> {
    dbg_parser!(i);
    map(
        separated_pair(parse_ipv4, char(':'), complete::u16),
        |(ip, port)| SocketAddress::new(ip, port),
    )
    .parse(i)
}

/// Dotted quad, groups are not range checked
#[function_name::named]
fn parse_ipv4(i: &str) -> IResult<&str, &str> {
    dbg_parser!(i);
    recognize((
        digit1,
        char('.'),
        digit1,
        char('.'),
        digit1,
        char('.'),
        digit1,
    ))
    .parse(i)
}
