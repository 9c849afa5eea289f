//! Capture Filter
//!
//! Userspace evaluation of a tcpdump-style filter expression.
//!
//! ```text
//! expr     := and ( ("or" | "||") and )*
//! and      := unary ( ("and" | "&&") unary )*
//! unary    := ("not" | "!") unary | primary
//! primary  := "(" expr ")"
//!           | "tcp" | "udp" | "ip" | "ip6"
//!           | [ "src" | "dst" ] ( "host" ADDR | "port" N | "net" CIDR )
//! ```

use flowwatch_core::{PacketDescriptor, TransportProtocol};
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Filter parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Expression ended where a term was expected
    #[error("unexpected end of filter expression")]
    UnexpectedEnd,

    /// Token not valid at this position
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    /// Port is not a number in 0..=65535
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// Address or network does not parse
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Protocol(TransportProtocol),
    Ipv4,
    Ipv6,
    Host(Side, IpAddr),
    Port(Side, u16),
    Net(Side, IpNetwork),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn matches(&self, packet: &PacketDescriptor) -> bool {
        match self {
            Self::Protocol(protocol) => packet.transport.map_or(false, |t| t.protocol == *protocol),
            Self::Ipv4 => packet.network.map_or(false, |n| n.src.is_ipv4()),
            Self::Ipv6 => packet.network.map_or(false, |n| n.src.is_ipv6()),
            Self::Host(side, addr) => packet
                .network
                .map_or(false, |n| side.test(n.src, n.dst, |ip| ip == *addr)),
            Self::Net(side, net) => packet
                .network
                .map_or(false, |n| side.test(n.src, n.dst, |ip| net.contains(ip))),
            Self::Port(side, port) => packet
                .transport
                .filter(|t| t.protocol.is_tracked())
                .map_or(false, |t| side.test(t.src_port, t.dst_port, |p| p == *port)),
            Self::Not(inner) => !inner.matches(packet),
            Self::And(a, b) => a.matches(packet) && b.matches(packet),
            Self::Or(a, b) => a.matches(packet) || b.matches(packet),
        }
    }
}

impl Side {
    fn test<T: Copy>(self, src: T, dst: T, pred: impl Fn(T) -> bool) -> bool {
        match self {
            Self::Src => pred(src),
            Self::Dst => pred(dst),
            Self::Either => pred(src) || pred(dst),
        }
    }
}

/// Compiled filter expression
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFilter {
    source: String,
    expr: Option<Expr>,
}

impl CaptureFilter {
    /// Filter that accepts everything
    pub fn accept_all() -> Self {
        Self {
            source: String::new(),
            expr: None,
        }
    }

    /// Parse an expression; blank input accepts everything
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(source);
        if tokens.is_empty() {
            return Ok(Self::accept_all());
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(FilterError::UnexpectedToken(token.to_string()));
        }

        Ok(Self {
            source: source.trim().to_string(),
            expr: Some(expr),
        })
    }

    /// Whether the packet passes
    #[inline]
    pub fn matches(&self, packet: &PacketDescriptor) -> bool {
        self.expr.as_ref().map_or(true, |expr| expr.matches(packet))
    }

    /// Whether this filter accepts everything
    pub fn is_accept_all(&self) -> bool {
        self.expr.is_none()
    }
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("<all>")
        } else {
            f.write_str(&self.source)
        }
    }
}

fn tokenize(source: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '!' => {
                tokens.push(c.to_string());
                chars.next();
            }
            '&' | '|' => {
                chars.next();
                if chars.peek() == Some(&c) {
                    chars.next();
                    tokens.push(format!("{c}{c}"));
                } else {
                    tokens.push(c.to_string());
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "()!&|".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(word);
            }
        }
    }

    tokens
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Result<&str, FilterError> {
        let token = self.tokens.get(self.pos).ok_or(FilterError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token.as_str())
    }

    fn eat(&mut self, alternatives: &[&str]) -> bool {
        match self.peek() {
            Some(token) if alternatives.contains(&token) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let mut expr = self.parse_and()?;
        while self.eat(&["or", "||"]) {
            expr = Expr::Or(Box::new(expr), Box::new(self.parse_and()?));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let mut expr = self.parse_unary()?;
        while self.eat(&["and", "&&"]) {
            expr = Expr::And(Box::new(expr), Box::new(self.parse_unary()?));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        if self.eat(&["not", "!"]) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, FilterError> {
        let token = self.next()?.to_string();
        match token.as_str() {
            "(" => {
                let expr = self.parse_or()?;
                match self.next()? {
                    ")" => Ok(expr),
                    other => Err(FilterError::UnexpectedToken(other.to_string())),
                }
            }
            "tcp" => Ok(Expr::Protocol(TransportProtocol::Tcp)),
            "udp" => Ok(Expr::Protocol(TransportProtocol::Udp)),
            "ip" => Ok(Expr::Ipv4),
            "ip6" => Ok(Expr::Ipv6),
            "src" => self.parse_qualified(Side::Src),
            "dst" => self.parse_qualified(Side::Dst),
            "host" | "port" | "net" => {
                self.pos -= 1;
                self.parse_qualified(Side::Either)
            }
            _ => Err(FilterError::UnexpectedToken(token)),
        }
    }

    fn parse_qualified(&mut self, side: Side) -> Result<Expr, FilterError> {
        let kind = self.next()?.to_string();
        let value = self.next()?.to_string();
        match kind.as_str() {
            "host" => value
                .parse::<IpAddr>()
                .map(|addr| Expr::Host(side, addr))
                .map_err(|_| FilterError::InvalidAddress(value)),
            "port" => value
                .parse::<u16>()
                .map(|port| Expr::Port(side, port))
                .map_err(|_| FilterError::InvalidPort(value)),
            "net" => value
                .parse::<IpNetwork>()
                .map(|net| Expr::Net(side, net))
                .map_err(|_| FilterError::InvalidAddress(value)),
            _ => Err(FilterError::UnexpectedToken(kind)),
        }
    }
}
