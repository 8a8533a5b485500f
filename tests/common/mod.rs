//! A scripted in-process server speaking just enough of the v3 protocol.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use pgsession::Connection;

const SSL_REQUEST: u32 = 80877103;
const CANCEL_REQUEST: u32 = 80877102;

pub const USERS_TABLE_OID: u32 = 16384;
pub const WIDGET_TYPE_OID: u32 = 9999;
/// Reported by the catalog on the first lookup only.
pub const RETIRED_TYPE_OID: u32 = 9998;
/// Reported by the catalog on the first lookup only.
pub const DROPPED_TABLE_OID: u32 = 16385;

#[derive(Default)]
pub struct Shared {
    next_pid: AtomicU32,
    widget_lookups: AtomicU32,
    flaky_tripped: AtomicBool,
    retired_type_reported: AtomicBool,
    dropped_table_reported: AtomicBool,
    pub cancels: AtomicU32,
    /// Answer cancel requests with a stray byte instead of a bare close.
    pub chatty_cancel: AtomicBool,
    pub log: Mutex<Vec<String>>,
}

impl Shared {
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|s| *s == sql).count()
    }
}

pub struct FakeServer {
    addr: SocketAddr,
    pub shared: Arc<Shared>,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            next_pid: AtomicU32::new(1000),
            ..Shared::default()
        });
        let accept_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let shared = Arc::clone(&accept_shared);
                thread::spawn(move || {
                    let _ = serve(stream, &shared);
                });
            }
        });
        Self { addr, shared }
    }

    pub fn conninfo(&self) -> String {
        format!(
            "host=127.0.0.1 port={} user=tester dbname=app sslmode=disable",
            self.addr.port()
        )
    }

    pub fn connect(&self) -> Connection {
        Connection::connect(&self.conninfo()).expect("Failed to connect")
    }
}

// === Wire helpers ===

fn message(out: &mut Vec<u8>, type_byte: u8, payload: &[u8]) {
    out.push(type_byte);
    out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

fn cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

struct Col {
    name: &'static str,
    table_oid: u32,
    column_id: i16,
    type_oid: u32,
}

fn col(name: &'static str, type_oid: u32) -> Col {
    Col {
        name,
        table_oid: 0,
        column_id: 0,
        type_oid,
    }
}

fn row_description(out: &mut Vec<u8>, cols: &[Col]) {
    let mut p = (cols.len() as i16).to_be_bytes().to_vec();
    for c in cols {
        cstr(&mut p, c.name);
        p.extend_from_slice(&c.table_oid.to_be_bytes());
        p.extend_from_slice(&c.column_id.to_be_bytes());
        p.extend_from_slice(&c.type_oid.to_be_bytes());
        p.extend_from_slice(&(-1_i16).to_be_bytes());
        p.extend_from_slice(&(-1_i32).to_be_bytes());
        p.extend_from_slice(&0_i16.to_be_bytes());
    }
    message(out, b'T', &p);
}

fn data_row(out: &mut Vec<u8>, values: &[Option<&str>]) {
    let mut p = (values.len() as i16).to_be_bytes().to_vec();
    for v in values {
        match v {
            Some(v) => {
                p.extend_from_slice(&(v.len() as i32).to_be_bytes());
                p.extend_from_slice(v.as_bytes());
            }
            None => p.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    message(out, b'D', &p);
}

fn command_complete(out: &mut Vec<u8>, tag: &str) {
    let mut p = Vec::new();
    cstr(&mut p, tag);
    message(out, b'C', &p);
}

fn error_response(out: &mut Vec<u8>, code: &str, text: &str) {
    let mut p = Vec::new();
    for (field, value) in [(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', text)] {
        p.push(field);
        cstr(&mut p, value);
    }
    p.push(0);
    message(out, b'E', &p);
}

fn parameter_status(out: &mut Vec<u8>, name: &str, value: &str) {
    let mut p = Vec::new();
    cstr(&mut p, name);
    cstr(&mut p, value);
    message(out, b'S', &p);
}

fn ready(out: &mut Vec<u8>) {
    message(out, b'Z', b"I");
}

fn read_u32(stream: &mut TcpStream) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    stream.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn take_cstr(buf: &[u8], pos: &mut usize) -> String {
    let end = buf[*pos..].iter().position(|&b| b == 0).unwrap() + *pos;
    let s = String::from_utf8_lossy(&buf[*pos..end]).into_owned();
    *pos = end + 1;
    s
}

fn take_i16(buf: &[u8], pos: &mut usize) -> i16 {
    let v = i16::from_be_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    v
}

fn take_i32(buf: &[u8], pos: &mut usize) -> i32 {
    let v = i32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    v
}

// === Session ===

enum Reply {
    Send(Vec<u8>),
    Hangup,
}

fn serve(mut stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    // Startup packets carry no type byte
    loop {
        let len = read_u32(&mut stream)? as usize;
        let mut body = vec![0u8; len - 4];
        stream.read_exact(&mut body)?;
        let code = u32::from_be_bytes(body[..4].try_into().unwrap());
        match code {
            SSL_REQUEST => stream.write_all(b"N")?,
            CANCEL_REQUEST => {
                shared.cancels.fetch_add(1, Ordering::SeqCst);
                if shared.chatty_cancel.load(Ordering::SeqCst) {
                    stream.write_all(b"?")?;
                }
                return Ok(());
            }
            _ => break,
        }
    }

    let pid = shared.next_pid.fetch_add(1, Ordering::SeqCst);
    let mut out = Vec::new();
    message(&mut out, b'R', &0_i32.to_be_bytes());
    parameter_status(&mut out, "server_version", "16.2");
    parameter_status(&mut out, "client_encoding", "UTF8");
    let mut key = pid.to_be_bytes().to_vec();
    key.extend_from_slice(&0x5ec2_e7u32.to_be_bytes());
    message(&mut out, b'K', &key);
    ready(&mut out);
    stream.write_all(&out)?;

    let mut statements: HashMap<String, String> = HashMap::new();
    let mut extended = Extended::default();

    loop {
        let mut type_byte = [0u8; 1];
        if stream.read_exact(&mut type_byte).is_err() {
            return Ok(());
        }
        let len = read_u32(&mut stream)? as usize;
        let mut body = vec![0u8; len - 4];
        stream.read_exact(&mut body)?;
        let mut pos = 0;

        let reply = match type_byte[0] {
            b'Q' => {
                let sql = take_cstr(&body, &mut pos);
                simple_query(&sql, pid, shared)
            }
            b'P' => {
                let name = take_cstr(&body, &mut pos);
                let sql = take_cstr(&body, &mut pos);
                statements.insert(name, sql.clone());
                extended.parsed = true;
                extended.sql = Some(sql);
                continue;
            }
            b'B' => {
                let _portal = take_cstr(&body, &mut pos);
                let statement = take_cstr(&body, &mut pos);
                let formats = take_i16(&body, &mut pos);
                pos += 2 * formats as usize;
                let count = take_i16(&body, &mut pos);
                let mut params = Vec::new();
                for _ in 0..count {
                    let n = take_i32(&body, &mut pos);
                    if n < 0 {
                        params.push(None);
                    } else {
                        let end = pos + n as usize;
                        params.push(Some(String::from_utf8_lossy(&body[pos..end]).into_owned()));
                        pos = end;
                    }
                }
                extended.bound = true;
                extended.sql = statements.get(&statement).cloned();
                extended.params = params;
                continue;
            }
            b'D' | b'E' => continue,
            b'S' => {
                let reply = extended.finish(shared);
                extended = Extended::default();
                reply
            }
            b'X' => return Ok(()),
            _ => {
                let mut out = Vec::new();
                error_response(&mut out, "08P01", "unexpected message");
                ready(&mut out);
                Reply::Send(out)
            }
        };

        match reply {
            Reply::Send(out) => stream.write_all(&out)?,
            Reply::Hangup => return Ok(()),
        }
    }
}

fn simple_query(sql: &str, pid: u32, shared: &Shared) -> Reply {
    let mut out = Vec::new();
    if sql.trim().is_empty() {
        message(&mut out, b'I', &[]);
        ready(&mut out);
        return Reply::Send(out);
    }

    for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        shared.log.lock().unwrap().push(statement.to_string());

        match statement {
            "SELECT oid, typname FROM pg_type" => {
                row_description(&mut out, &[col("oid", 26), col("typname", 19)]);
                for (oid, name) in [("16", "bool"), ("23", "int4"), ("25", "text")] {
                    data_row(&mut out, &[Some(oid), Some(name)]);
                }
                command_complete(&mut out, "SELECT 3");
            }
            "SELECT 1" => {
                row_description(&mut out, &[col("?column?", 23)]);
                data_row(&mut out, &[Some("1")]);
                command_complete(&mut out, "SELECT 1");
            }
            "SELECT 2" => {
                row_description(&mut out, &[col("?column?", 23)]);
                data_row(&mut out, &[Some("2")]);
                command_complete(&mut out, "SELECT 1");
            }
            "SELECT doomed" => return Reply::Hangup,
            "SELECT flaky" => {
                if !shared.flaky_tripped.swap(true, Ordering::SeqCst) {
                    return Reply::Hangup;
                }
                row_description(&mut out, &[col("flaky", 25)]);
                data_row(&mut out, &[Some("ok")]);
                command_complete(&mut out, "SELECT 1");
            }
            "SELECT id, name FROM users" => {
                row_description(
                    &mut out,
                    &[
                        Col {
                            name: "id",
                            table_oid: USERS_TABLE_OID,
                            column_id: 1,
                            type_oid: 23,
                        },
                        Col {
                            name: "name",
                            table_oid: USERS_TABLE_OID,
                            column_id: 2,
                            type_oid: 25,
                        },
                    ],
                );
                data_row(&mut out, &[Some("1"), Some("alice")]);
                data_row(&mut out, &[Some("2"), Some("bob")]);
                data_row(&mut out, &[Some("3"), None]);
                command_complete(&mut out, "SELECT 3");
            }
            "SELECT widget" => {
                row_description(&mut out, &[col("w", WIDGET_TYPE_OID)]);
                data_row(&mut out, &[Some("(1,2)")]);
                command_complete(&mut out, "SELECT 1");
            }
            "NOTIFY jobs, 'ready'" => {
                command_complete(&mut out, "NOTIFY");
                let mut p = pid.to_be_bytes().to_vec();
                cstr(&mut p, "jobs");
                cstr(&mut p, "ready");
                message(&mut out, b'A', &p);
            }
            s if s.starts_with("CREATE TABLE") => command_complete(&mut out, "CREATE TABLE"),
            s if s.starts_with("INSERT") => command_complete(&mut out, "INSERT 0 3"),
            _ => {
                error_response(&mut out, "42601", "syntax error");
                break;
            }
        }
    }
    ready(&mut out);
    Reply::Send(out)
}

#[derive(Default)]
struct Extended {
    parsed: bool,
    bound: bool,
    sql: Option<String>,
    params: Vec<Option<String>>,
}

impl Extended {
    fn finish(&self, shared: &Shared) -> Reply {
        let mut out = Vec::new();
        let sql = self.sql.clone().unwrap_or_default();
        if self.parsed {
            message(&mut out, b'1', &[]);
        }
        if self.bound {
            shared.log.lock().unwrap().push(sql.clone());
            message(&mut out, b'2', &[]);
            let param = self.params.first().cloned().flatten();
            match sql.as_str() {
                "SELECT oid, typname FROM pg_type WHERE oid = $1" => {
                    row_description(&mut out, &[col("oid", 26), col("typname", 19)]);
                    let name = match param.as_deref() {
                        Some("9999") => {
                            let n = shared.widget_lookups.fetch_add(1, Ordering::SeqCst) + 1;
                            Some(format!("widget_v{}", n))
                        }
                        Some("23") => Some("int4".to_string()),
                        Some("9998") if !shared.retired_type_reported.swap(true, Ordering::SeqCst) => {
                            Some("retired_type".to_string())
                        }
                        _ => None,
                    };
                    let count = if let Some(name) = name {
                        data_row(&mut out, &[param.as_deref(), Some(&name)]);
                        1
                    } else {
                        0
                    };
                    command_complete(&mut out, &format!("SELECT {}", count));
                }
                "SELECT oid, relname FROM pg_class WHERE oid = $1" => {
                    row_description(&mut out, &[col("oid", 26), col("relname", 19)]);
                    let name = match param.as_deref() {
                        Some("16384") => Some("users"),
                        Some("16385") if !shared.dropped_table_reported.swap(true, Ordering::SeqCst) => {
                            Some("dropped_soon")
                        }
                        _ => None,
                    };
                    if let Some(name) = name {
                        data_row(&mut out, &[param.as_deref(), Some(name)]);
                        command_complete(&mut out, "SELECT 1");
                    } else {
                        command_complete(&mut out, "SELECT 0");
                    }
                }
                "SELECT $1" => {
                    row_description(&mut out, &[col("?column?", 25)]);
                    data_row(&mut out, &[param.as_deref()]);
                    command_complete(&mut out, "SELECT 1");
                }
                s if s.starts_with("INSERT") => {
                    message(&mut out, b'n', &[]);
                    command_complete(&mut out, "INSERT 0 1");
                }
                _ => error_response(&mut out, "42601", "syntax error"),
            }
        }
        ready(&mut out);
        Reply::Send(out)
    }
}
