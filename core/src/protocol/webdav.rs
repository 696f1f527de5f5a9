/*
 * webdav.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gumdrop, a multi-protocol internet server.
 *
 * Gumdrop is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gumdrop is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gumdrop.  If not, see <http://www.gnu.org/licenses/>.
 */

//! WebDAV XML request and response shapes (RFC 2518) used by the file
//! handler: PROPFIND and LOCK request bodies, multistatus and
//! lockdiscovery responses. Lock and property semantics stay with the
//! handler; this is only the wire shape, read and written with quick-xml.

use std::io;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Parsed PROPFIND request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropfindRequest {
    /// Specific properties, by local name.
    Prop(Vec<String>),
    /// `<allprop/>` (also the meaning of an empty body).
    AllProp,
    /// `<propname/>`.
    PropName,
}

/// Parse a PROPFIND body. An empty body means allprop (RFC 2518 §8.1).
pub fn parse_propfind(body: &[u8]) -> io::Result<PropfindRequest> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(PropfindRequest::AllProp);
    }
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut in_prop = false;
    let mut names: Vec<String> = Vec::new();
    let mut mode: Option<PropfindRequest> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"propfind" => {}
                    b"allprop" => mode = Some(PropfindRequest::AllProp),
                    b"propname" => mode = Some(PropfindRequest::PropName),
                    b"prop" => in_prop = true,
                    name if in_prop => {
                        names.push(String::from_utf8_lossy(name).into_owned());
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"prop" {
                    in_prop = false;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(invalid(&format!("propfind body: {}", e))),
        }
        buf.clear();
    }
    match mode {
        Some(mode) => Ok(mode),
        None if !names.is_empty() => Ok(PropfindRequest::Prop(names)),
        None => Err(invalid("propfind body without prop, allprop or propname")),
    }
}

/// Parsed LOCK request body (lockinfo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub exclusive: bool,
    pub owner: Option<String>,
}

/// Parse a lockinfo body. Only write locks exist in the protocol.
pub fn parse_lockinfo(body: &[u8]) -> io::Result<LockRequest> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut seen_lockinfo = false;
    let mut exclusive = false;
    let mut in_owner = false;
    let mut owner: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"lockinfo" => seen_lockinfo = true,
                    b"exclusive" => exclusive = true,
                    b"shared" => exclusive = false,
                    b"owner" => in_owner = true,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"owner" {
                    in_owner = false;
                }
            }
            Ok(Event::Text(t)) if in_owner => {
                let text = t.unescape().map_err(|e| invalid(&e.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    owner = Some(text.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(invalid(&format!("lockinfo body: {}", e))),
        }
        buf.clear();
    }
    if !seen_lockinfo {
        return Err(invalid("missing lockinfo element"));
    }
    Ok(LockRequest { exclusive, owner })
}

/// One property with an optional text value.
#[derive(Debug, Clone)]
pub struct PropValue {
    /// Local name within the DAV: namespace, e.g. "getcontentlength".
    pub name: String,
    pub value: Option<String>,
}

impl PropValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// One `<response>` in a multistatus: found properties go out under a 200
/// propstat, missing names under a 404 propstat.
#[derive(Debug, Clone)]
pub struct ResponseEntry {
    pub href: String,
    pub found: Vec<PropValue>,
    pub missing: Vec<String>,
}

/// Serialize a 207 multistatus body.
pub fn write_multistatus(entries: &[ResponseEntry]) -> io::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| invalid(&e.to_string()))?;

    let mut multistatus = BytesStart::new("D:multistatus");
    multistatus.push_attribute(("xmlns:D", "DAV:"));
    write_start(&mut writer, multistatus)?;

    for entry in entries {
        write_start(&mut writer, BytesStart::new("D:response"))?;
        write_text_element(&mut writer, "D:href", &entry.href)?;

        if !entry.found.is_empty() {
            write_start(&mut writer, BytesStart::new("D:propstat"))?;
            write_start(&mut writer, BytesStart::new("D:prop"))?;
            for prop in &entry.found {
                let name = format!("D:{}", prop.name);
                match &prop.value {
                    Some(value) => write_text_element(&mut writer, &name, value)?,
                    None => write_empty(&mut writer, &name)?,
                }
            }
            write_end(&mut writer, "D:prop")?;
            write_text_element(&mut writer, "D:status", "HTTP/1.1 200 OK")?;
            write_end(&mut writer, "D:propstat")?;
        }

        if !entry.missing.is_empty() {
            write_start(&mut writer, BytesStart::new("D:propstat"))?;
            write_start(&mut writer, BytesStart::new("D:prop"))?;
            for name in &entry.missing {
                write_empty(&mut writer, &format!("D:{}", name))?;
            }
            write_end(&mut writer, "D:prop")?;
            write_text_element(&mut writer, "D:status", "HTTP/1.1 404 Not Found")?;
            write_end(&mut writer, "D:propstat")?;
        }

        write_end(&mut writer, "D:response")?;
    }

    write_end(&mut writer, "D:multistatus")?;
    Ok(writer.into_inner())
}

/// Serialize the prop/lockdiscovery body answering a successful LOCK.
pub fn write_lock_response(
    token: &str,
    exclusive: bool,
    owner: Option<&str>,
    timeout_seconds: u64,
    depth: &str,
) -> io::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| invalid(&e.to_string()))?;

    let mut prop = BytesStart::new("D:prop");
    prop.push_attribute(("xmlns:D", "DAV:"));
    write_start(&mut writer, prop)?;
    write_start(&mut writer, BytesStart::new("D:lockdiscovery"))?;
    write_start(&mut writer, BytesStart::new("D:activelock"))?;

    write_start(&mut writer, BytesStart::new("D:locktype"))?;
    write_empty(&mut writer, "D:write")?;
    write_end(&mut writer, "D:locktype")?;

    write_start(&mut writer, BytesStart::new("D:lockscope"))?;
    write_empty(&mut writer, if exclusive { "D:exclusive" } else { "D:shared" })?;
    write_end(&mut writer, "D:lockscope")?;

    write_text_element(&mut writer, "D:depth", depth)?;
    if let Some(owner) = owner {
        write_text_element(&mut writer, "D:owner", owner)?;
    }
    write_text_element(&mut writer, "D:timeout", &format!("Second-{}", timeout_seconds))?;

    write_start(&mut writer, BytesStart::new("D:locktoken"))?;
    write_text_element(&mut writer, "D:href", token)?;
    write_end(&mut writer, "D:locktoken")?;

    write_end(&mut writer, "D:activelock")?;
    write_end(&mut writer, "D:lockdiscovery")?;
    write_end(&mut writer, "D:prop")?;
    Ok(writer.into_inner())
}

/// Mint an opaque lock token (RFC 2518 §6.4 opaquelocktoken scheme).
pub fn generate_lock_token() -> io::Result<String> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(format!(
        "opaquelocktoken:{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15]
    ))
}

fn write_start(writer: &mut Writer<Vec<u8>>, start: BytesStart) -> io::Result<()> {
    writer
        .write_event(Event::Start(start))
        .map_err(|e| invalid(&e.to_string()))
}

fn write_end(writer: &mut Writer<Vec<u8>>, name: &str) -> io::Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| invalid(&e.to_string()))
}

fn write_empty(writer: &mut Writer<Vec<u8>>, name: &str) -> io::Result<()> {
    writer
        .write_event(Event::Empty(BytesStart::new(name)))
        .map_err(|e| invalid(&e.to_string()))
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> io::Result<()> {
    write_start(writer, BytesStart::new(name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| invalid(&e.to_string()))?;
    write_end(writer, name)
}
