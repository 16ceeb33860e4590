//! In-process RESP2 store used by the integration tests.
//!
//! Implements the subset of commands the client issues, with per-key
//! expiry, MULTI/EXEC queueing, pub/sub fan-out, and an echoing EVAL.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use kvb_client::{ClientConfig, ExhaustedPolicy};

/// Client configuration with short timeouts for tests.
pub fn test_config(addr: &str) -> ClientConfig {
    ClientConfig {
        addr: addr.to_string(),
        max_idle: 4,
        max_total: 4,
        exhausted: ExhaustedPolicy::Block {
            max_wait: Some(Duration::from_secs(2)),
        },
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
        connect_timeout: Some(Duration::from_secs(1)),
        reconnect_backoff: Duration::from_millis(200),
        subscribe_poll: Duration::from_millis(20),
        soft_delete_delay: Duration::from_millis(5),
    }
}

/// Address nothing listens on.
pub fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}

pub struct FakeStore {
    addr: String,
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    data: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<Subscriber>>,
    scripts: Mutex<HashMap<String, String>>,
    accepted: AtomicUsize,
    next_session: AtomicU64,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Text(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(Vec<String>),
}

struct Subscriber {
    session: u64,
    channels: Vec<String>,
    stream: TcpStream,
}

impl FakeStore {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let shared = Arc::new(Shared::default());

        let acceptor = shared.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                acceptor.accepted.fetch_add(1, Ordering::SeqCst);
                let session = acceptor.next_session.fetch_add(1, Ordering::SeqCst);
                let shared = acceptor.clone();
                thread::spawn(move || serve(stream, shared, session));
            }
        });

        FakeStore { addr, shared }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections accepted since start.
    pub fn accepted_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().unwrap().len()
    }

    /// Drops every subscribed connection, as a store restart would.
    pub fn kill_subscribers(&self) {
        let mut subscribers = self.shared.subscribers.lock().unwrap();
        for subscriber in subscribers.drain(..) {
            let _ = subscriber.stream.shutdown(Shutdown::Both);
        }
    }
}

fn serve(stream: TcpStream, shared: Arc<Shared>, session: u64) {
    let Ok(mut writer) = stream.try_clone() else { return };
    let mut reader = BufReader::new(stream);
    let mut queued: Option<Vec<Vec<Vec<u8>>>> = None;

    while let Ok(Some(args)) = read_command(&mut reader) {
        let reply = if args.is_empty() {
            resp_error("ERR empty command")
        } else if eq(&args[0], "SUBSCRIBE") {
            subscribe(&shared, session, &args, &writer);
            Vec::new()
        } else if let Some(batch) = queued.as_mut() {
            if eq(&args[0], "EXEC") {
                let batch = queued.take().unwrap_or_default();
                let replies = batch.iter().map(|cmd| dispatch(&shared, cmd)).collect();
                resp_array(replies)
            } else if eq(&args[0], "DISCARD") {
                queued = None;
                resp_simple("OK")
            } else if eq(&args[0], "MULTI") {
                resp_error("ERR MULTI calls can not be nested")
            } else {
                batch.push(args);
                resp_simple("QUEUED")
            }
        } else if eq(&args[0], "MULTI") {
            queued = Some(Vec::new());
            resp_simple("OK")
        } else if eq(&args[0], "EXEC") || eq(&args[0], "DISCARD") {
            resp_error("ERR without MULTI")
        } else {
            dispatch(&shared, &args)
        };

        if !reply.is_empty() && (writer.write_all(&reply).is_err() || writer.flush().is_err()) {
            break;
        }
    }

    shared
        .subscribers
        .lock()
        .unwrap()
        .retain(|subscriber| subscriber.session != session);
}

fn subscribe(shared: &Shared, session: u64, args: &[Vec<u8>], writer: &TcpStream) {
    let Ok(stream) = writer.try_clone() else { return };
    let mut subscribers = shared.subscribers.lock().unwrap();
    let channels: Vec<String> = args[1..].iter().map(|c| text(c)).collect();

    let mut confirmations = Vec::new();
    for (idx, channel) in channels.iter().enumerate() {
        confirmations.extend(resp_array(vec![
            resp_bulk(b"subscribe"),
            resp_bulk(channel.as_bytes()),
            resp_integer(idx as i64 + 1),
        ]));
    }
    let mut out = &stream;
    let _ = out.write_all(&confirmations);
    subscribers.push(Subscriber {
        session,
        channels,
        stream,
    });
}

fn dispatch(shared: &Shared, args: &[Vec<u8>]) -> Vec<u8> {
    let cmd = text(&args[0]).to_ascii_uppercase();
    let argc = args.len();
    let mut data = shared.data.lock().unwrap();

    match cmd.as_str() {
        "PING" => resp_simple("PONG"),
        "GET" if argc == 2 => match live(&mut data, &args[1]) {
            None => resp_null(),
            Some(Entry { value: Value::Text(v), .. }) => resp_bulk(v.as_bytes()),
            Some(_) => wrong_type(),
        },
        "SET" if argc >= 3 => handle_set(&mut data, args),
        "DEL" if argc >= 2 => {
            let removed = args[1..]
                .iter()
                .filter(|key| {
                    live(&mut data, key).is_some() && data.remove(&text(key)).is_some()
                })
                .count();
            resp_integer(removed as i64)
        }
        "HMSET" if argc >= 4 && argc % 2 == 0 => {
            let entry = entry_or(&mut data, &args[1], || Value::Hash(HashMap::new()));
            let Value::Hash(hash) = &mut entry.value else { return wrong_type() };
            for pair in args[2..].chunks(2) {
                hash.insert(text(&pair[0]), text(&pair[1]));
            }
            resp_simple("OK")
        }
        "HSET" if argc == 4 => {
            let entry = entry_or(&mut data, &args[1], || Value::Hash(HashMap::new()));
            let Value::Hash(hash) = &mut entry.value else { return wrong_type() };
            let added = hash.insert(text(&args[2]), text(&args[3])).is_none();
            resp_integer(added as i64)
        }
        "HMGET" if argc >= 3 => {
            let hash = match live(&mut data, &args[1]) {
                None => None,
                Some(Entry { value: Value::Hash(hash), .. }) => Some(&*hash),
                Some(_) => return wrong_type(),
            };
            let values = args[2..]
                .iter()
                .map(|field| match hash.and_then(|h| h.get(&text(field))) {
                    Some(value) => resp_bulk(value.as_bytes()),
                    None => resp_null(),
                })
                .collect();
            resp_array(values)
        }
        "SADD" if argc >= 3 => {
            let entry = entry_or(&mut data, &args[1], || Value::Set(HashSet::new()));
            let Value::Set(set) = &mut entry.value else { return wrong_type() };
            let added = args[2..].iter().filter(|m| set.insert(text(m))).count();
            resp_integer(added as i64)
        }
        "SISMEMBER" if argc == 3 => match live(&mut data, &args[1]) {
            None => resp_integer(0),
            Some(Entry { value: Value::Set(set), .. }) => {
                resp_integer(set.contains(&text(&args[2])) as i64)
            }
            Some(_) => wrong_type(),
        },
        "SMEMBERS" if argc == 2 => match live(&mut data, &args[1]) {
            None => resp_array(Vec::new()),
            Some(Entry { value: Value::Set(set), .. }) => {
                resp_array(set.iter().map(|m| resp_bulk(m.as_bytes())).collect())
            }
            Some(_) => wrong_type(),
        },
        "RPUSH" if argc >= 3 => {
            let entry = entry_or(&mut data, &args[1], || Value::List(Vec::new()));
            let Value::List(list) = &mut entry.value else { return wrong_type() };
            list.extend(args[2..].iter().map(|m| text(m)));
            resp_integer(list.len() as i64)
        }
        "LRANGE" if argc == 4 => {
            let (Some(start), Some(stop)) = (parse_i64(&args[2]), parse_i64(&args[3])) else {
                return resp_error("ERR value is not an integer or out of range");
            };
            match live(&mut data, &args[1]) {
                None => resp_array(Vec::new()),
                Some(Entry { value: Value::List(list), .. }) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    if start > stop || start >= len {
                        return resp_array(Vec::new());
                    }
                    resp_array(
                        list[start as usize..=stop as usize]
                            .iter()
                            .map(|m| resp_bulk(m.as_bytes()))
                            .collect(),
                    )
                }
                Some(_) => wrong_type(),
            }
        }
        "INCR" if argc == 2 => {
            let entry = entry_or(&mut data, &args[1], || Value::Text("0".to_string()));
            let Value::Text(current) = &mut entry.value else { return wrong_type() };
            let Ok(number) = current.parse::<i64>() else {
                return resp_error("ERR value is not an integer or out of range");
            };
            *current = (number + 1).to_string();
            resp_integer(number + 1)
        }
        "EXPIRE" | "PEXPIRE" if argc == 3 => {
            let Some(amount) = parse_i64(&args[2]) else {
                return resp_error("ERR value is not an integer or out of range");
            };
            let ttl = if cmd == "EXPIRE" {
                Duration::from_secs(amount.max(0) as u64)
            } else {
                Duration::from_millis(amount.max(0) as u64)
            };
            match live(&mut data, &args[1]) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    resp_integer(1)
                }
                None => resp_integer(0),
            }
        }
        "EXPIREAT" if argc == 3 => {
            let Some(at) = parse_i64(&args[2]) else {
                return resp_error("ERR value is not an integer or out of range");
            };
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            match live(&mut data, &args[1]) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs((at - now).max(0) as u64));
                    resp_integer(1)
                }
                None => resp_integer(0),
            }
        }
        "PTTL" if argc == 2 => match live(&mut data, &args[1]) {
            None => resp_integer(-2),
            Some(Entry { expires_at: None, .. }) => resp_integer(-1),
            Some(Entry { expires_at: Some(at), .. }) => {
                resp_integer(at.saturating_duration_since(Instant::now()).as_millis() as i64)
            }
        },
        "PUBLISH" if argc == 3 => {
            drop(data);
            publish(shared, &text(&args[1]), &args[2])
        }
        "EVAL" if argc >= 3 => {
            drop(data);
            eval(&text(&args[1]), &args[2..])
        }
        "EVALSHA" if argc >= 3 => {
            drop(data);
            let script = shared.scripts.lock().unwrap().get(&text(&args[1])).cloned();
            match script {
                Some(script) => eval(&script, &args[2..]),
                None => resp_error("NOSCRIPT No matching script"),
            }
        }
        "SCRIPT" if argc == 3 && eq(&args[1], "LOAD") => {
            drop(data);
            let mut scripts = shared.scripts.lock().unwrap();
            let sha = format!("{:040x}", scripts.len() + 1);
            scripts.insert(sha.clone(), text(&args[2]));
            resp_bulk(sha.as_bytes())
        }
        _ => resp_error("ERR unknown command or wrong number of arguments"),
    }
}

fn handle_set(data: &mut HashMap<String, Entry>, args: &[Vec<u8>]) -> Vec<u8> {
    let mut only_if_absent = false;
    let mut ttl = None;
    let mut idx = 3;
    while idx < args.len() {
        let option = text(&args[idx]).to_ascii_uppercase();
        match option.as_str() {
            "NX" => only_if_absent = true,
            "EX" | "PX" => {
                let Some(amount) = args.get(idx + 1).and_then(|a| parse_i64(a)) else {
                    return resp_error("ERR syntax error");
                };
                if amount <= 0 {
                    return resp_error("ERR invalid expire time in 'set' command");
                }
                ttl = Some(if option == "EX" {
                    Duration::from_secs(amount as u64)
                } else {
                    Duration::from_millis(amount as u64)
                });
                idx += 1;
            }
            _ => return resp_error("ERR syntax error"),
        }
        idx += 1;
    }

    if only_if_absent && live(data, &args[1]).is_some() {
        return resp_null();
    }
    data.insert(
        text(&args[1]),
        Entry {
            value: Value::Text(text(&args[2])),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        },
    );
    resp_simple("OK")
}

fn publish(shared: &Shared, channel: &str, payload: &[u8]) -> Vec<u8> {
    let subscribers = shared.subscribers.lock().unwrap();
    let frame = resp_array(vec![
        resp_bulk(b"message"),
        resp_bulk(channel.as_bytes()),
        resp_bulk(payload),
    ]);
    let mut receivers = 0;
    for subscriber in subscribers.iter().filter(|s| s.channels.iter().any(|c| c == channel)) {
        let mut out = &subscriber.stream;
        if out.write_all(&frame).is_ok() {
            receivers += 1;
        }
    }
    resp_integer(receivers)
}

/// Echoes `KEYS` then `ARGV` back as an array; the script `error` fails.
fn eval(script: &str, rest: &[Vec<u8>]) -> Vec<u8> {
    if script == "error" {
        return resp_error("ERR script failed");
    }
    let Some(numkeys) = parse_i64(&rest[0]) else {
        return resp_error("ERR value is not an integer or out of range");
    };
    if numkeys < 0 || numkeys as usize > rest.len() - 1 {
        return resp_error("ERR Number of keys can't be greater than number of args");
    }
    resp_array(rest[1..].iter().map(|item| resp_bulk(item)).collect())
}

fn live<'a>(data: &'a mut HashMap<String, Entry>, key: &[u8]) -> Option<&'a mut Entry> {
    let key = text(key);
    let expired = matches!(data.get(&key), Some(Entry { expires_at: Some(at), .. }) if *at <= Instant::now());
    if expired {
        data.remove(&key);
    }
    data.get_mut(&key)
}

fn entry_or<'a>(
    data: &'a mut HashMap<String, Entry>,
    key: &[u8],
    make: impl FnOnce() -> Value,
) -> &'a mut Entry {
    let _ = live(data, key);
    data.entry(text(key)).or_insert_with(|| Entry {
        value: make(),
        expires_at: None,
    })
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn eq(data: &[u8], name: &str) -> bool {
    data.eq_ignore_ascii_case(name.as_bytes())
}

fn wrong_type() -> Vec<u8> {
    resp_error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub fn resp_simple(msg: &str) -> Vec<u8> {
    format!("+{}\r\n", msg).into_bytes()
}

pub fn resp_error(msg: &str) -> Vec<u8> {
    format!("-{}\r\n", msg).into_bytes()
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

pub fn resp_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend(item);
    }
    out
}
