//! In-process stand-in for the Redis commands the admin client issues.
//!
//! `FakeRedis` speaks RESP2 on an ephemeral local port and keeps sets, lists,
//! sorted sets and hashes in memory. `EVALSHA` answers `NOSCRIPT` until a
//! `SCRIPT LOAD` has been seen and then runs the dead-job requeue script.
//! Commands it does not know are acknowledged with `+OK`.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::Client;
use crate::pool::{PoolConfig, RedisConnector, RedisPool};
use crate::sentinel::StaticResolver;

const SCRIPT_SHA: &str = "0000000000000000000000000000000000000000";

enum Reply {
    Status(&'static str),
    Int(i64),
    Bulk(String),
    Nil,
    Array(Vec<Reply>),
    Error(&'static str),
}

impl Reply {
    fn bulks<I: IntoIterator<Item = String>>(items: I) -> Self {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
            Reply::Int(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
            Reply::Bulk(s) => {
                out.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            Reply::Error(e) => out.extend_from_slice(format!("-{}\r\n", e).as_bytes()),
        }
    }
}

#[derive(Default)]
struct Store {
    sets: HashMap<String, BTreeSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
    // Kept ordered by (score, member).
    zsets: HashMap<String, Vec<(f64, String)>>,
    hashes: HashMap<String, HashMap<String, String>>,
    script_loaded: bool,
}

impl Store {
    fn execute(&mut self, args: &[String]) -> Reply {
        let Some(name) = args.first() else {
            return Reply::Error("ERR empty command");
        };
        let key = args.get(1).cloned().unwrap_or_default();
        let rest = args.get(2..).unwrap_or_default();

        match name.to_ascii_uppercase().as_str() {
            "PING" => Reply::Status("PONG"),
            "SMEMBERS" => Reply::bulks(self.sets.get(&key).into_iter().flatten().cloned()),
            "SADD" => Reply::Int(rest.iter().filter(|m| self.sadd(&key, m)).count() as i64),
            "LLEN" => Reply::Int(self.lists.get(&key).map_or(0, |l| l.len() as i64)),
            "LINDEX" => {
                let list = self.lists.get(&key);
                let len = list.map_or(0, |l| l.len() as i64);
                let index = int_arg(rest, 0);
                let index = if index < 0 { len + index } else { index };
                match list.and_then(|l| usize::try_from(index).ok().and_then(|i| l.get(i))) {
                    Some(value) => Reply::Bulk(value.clone()),
                    None => Reply::Nil,
                }
            }
            "LPUSH" => {
                for value in rest {
                    self.lpush(&key, value);
                }
                Reply::Int(self.lists.get(&key).map_or(0, |l| l.len() as i64))
            }
            "HGETALL" => Reply::bulks(
                self.hashes
                    .get(&key)
                    .into_iter()
                    .flatten()
                    .flat_map(|(f, v)| [f.clone(), v.clone()]),
            ),
            "HSET" => {
                let hash = self.hashes.entry(key).or_default();
                let added = rest
                    .chunks(2)
                    .filter(|pair| pair.len() == 2)
                    .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                Reply::Int(added as i64)
            }
            "ZADD" => {
                let added = rest
                    .chunks(2)
                    .filter(|pair| pair.len() == 2)
                    .filter(|pair| self.zadd(&key, &pair[1], score_arg(&pair[0])))
                    .count();
                Reply::Int(added as i64)
            }
            "ZCARD" => Reply::Int(self.zsets.get(&key).map_or(0, |z| z.len() as i64)),
            "ZRANGE" => {
                let members = self.zsets.get(&key).map(Vec::as_slice).unwrap_or_default();
                let range = index_range(members.len(), int_arg(rest, 0), int_arg(rest, 1));
                let with_scores = rest
                    .get(2)
                    .is_some_and(|a| a.eq_ignore_ascii_case("WITHSCORES"));
                Reply::bulks(members[range].iter().flat_map(|(score, member)| {
                    let mut out = vec![member.clone()];
                    if with_scores {
                        out.push(format_score(*score));
                    }
                    out
                }))
            }
            "ZRANGEBYSCORE" => {
                let (min, max) = (score_arg(&rest[0]), score_arg(&rest[1]));
                Reply::bulks(
                    self.zsets
                        .get(&key)
                        .into_iter()
                        .flatten()
                        .filter(|(score, _)| *score >= min && *score <= max)
                        .map(|(_, member)| member.clone()),
                )
            }
            "ZREM" => Reply::Int(rest.iter().filter(|m| self.zrem(&key, m)).count() as i64),
            "DEL" => {
                let removed = args[1..].iter().filter(|k| self.del(k)).count();
                Reply::Int(removed as i64)
            }
            "SCRIPT" if key.eq_ignore_ascii_case("LOAD") => {
                self.script_loaded = true;
                Reply::Bulk(SCRIPT_SHA.to_string())
            }
            "EVALSHA" if !self.script_loaded => {
                Reply::Error("NOSCRIPT No matching script. Please use EVAL.")
            }
            "EVALSHA" | "EVAL" => self.requeue_dead_job(rest),
            _ => Reply::Status("OK"),
        }
    }

    /// KEYS: dead set, job list, known jobs set.
    /// ARGV: stored dead job, re-encoded job, job name.
    fn requeue_dead_job(&mut self, rest: &[String]) -> Reply {
        let numkeys = int_arg(rest, 0) as usize;
        let keys = &rest[1..1 + numkeys];
        let argv = &rest[1 + numkeys..];
        if !self.zrem(&keys[0], &argv[0]) {
            return Reply::Int(0);
        }
        self.lpush(&keys[1], &argv[1]);
        self.sadd(&keys[2], &argv[2]);
        Reply::Int(1)
    }

    fn sadd(&mut self, key: &str, member: &str) -> bool {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string())
    }

    fn lpush(&mut self, key: &str, value: &str) {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> bool {
        let zset = self.zsets.entry(key.to_string()).or_default();
        let existed = zset.iter().position(|(_, m)| m == member).map(|i| zset.remove(i));
        zset.push((score, member.to_string()));
        zset.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        existed.is_none()
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        let Some(zset) = self.zsets.get_mut(key) else {
            return false;
        };
        match zset.iter().position(|(_, m)| m == member) {
            Some(i) => {
                zset.remove(i);
                true
            }
            None => false,
        }
    }

    fn del(&mut self, key: &str) -> bool {
        let set = self.sets.remove(key).is_some();
        let list = self.lists.remove(key).is_some();
        let zset = self.zsets.remove(key).is_some();
        let hash = self.hashes.remove(key).is_some();
        set || list || zset || hash
    }
}

fn int_arg(args: &[String], i: usize) -> i64 {
    args.get(i).and_then(|a| a.parse().ok()).unwrap_or(0)
}

fn score_arg(arg: &str) -> f64 {
    arg.parse().unwrap_or(0.0)
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        score.to_string()
    }
}

/// Clamps inclusive `ZRANGE`-style indices, negative ones counting from the end.
fn index_range(len: usize, start: i64, stop: i64) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop {
        0..0
    } else {
        start as usize..stop as usize + 1
    }
}

/// Reads one RESP array of bulk strings from the front of `buf`. Returns the
/// arguments and the number of bytes consumed, or `None` if `buf` does not
/// yet hold a whole command.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (count, mut pos) = read_header(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = read_header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end + 2;
    }
    Some((args, pos))
}

fn read_header(buf: &[u8], pos: usize, prefix: u8) -> Option<(usize, usize)> {
    if *buf.get(pos)? != prefix {
        return None;
    }
    let line = &buf[pos + 1..];
    let end = line.windows(2).position(|w| w == b"\r\n")?;
    let n = std::str::from_utf8(&line[..end]).ok()?.parse().ok()?;
    Some((n, pos + 1 + end + 2))
}

async fn serve(mut socket: TcpStream, store: Arc<Mutex<Store>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let mut out = Vec::new();
        while let Some((args, used)) = parse_command(&buf) {
            buf.drain(..used);
            lock(&store).execute(&args).encode(&mut out);
        }
        if !out.is_empty() {
            socket.write_all(&out).await?;
        }

        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn lock(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().expect("store lock not poisoned")
}

/// A RESP server on `127.0.0.1` backed by an in-memory store.
pub struct FakeRedis {
    addr: SocketAddr,
    store: Arc<Mutex<Store>>,
    accept: JoinHandle<()>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let store = Arc::new(Mutex::new(Store::default()));

        let shared = Arc::clone(&store);
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&shared)));
            }
        });

        Self {
            addr,
            store,
            accept,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// A client for `namespace` whose pool dials this server directly.
    pub fn client(&self, namespace: &str) -> Client {
        let connector = RedisConnector::new(Arc::new(StaticResolver::new(self.addr())), 0);
        Client::new(namespace, RedisPool::new(connector, PoolConfig::default()))
    }

    pub fn sadd(&self, key: &str, member: &str) {
        lock(&self.store).sadd(key, member);
    }

    pub fn lpush(&self, key: &str, value: &str) {
        lock(&self.store).lpush(key, value);
    }

    pub fn zadd(&self, key: &str, member: &str, score: i64) {
        lock(&self.store).zadd(key, member, score as f64);
    }

    pub fn hset(&self, key: &str, fields: &[(&str, &str)]) {
        let mut store = lock(&self.store);
        let hash = store.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.to_string());
        }
    }

    /// List contents, head first.
    pub fn list(&self, key: &str) -> Vec<String> {
        lock(&self.store)
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        lock(&self.store)
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted set members in score order.
    pub fn sorted(&self, key: &str) -> Vec<String> {
        lock(&self.store)
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// A dead job as the queue engine stores it.
pub fn dead_job_json(name: &str, id: &str, died_at: i64) -> String {
    format!(
        r#"{{"name":"{}","id":"{}","t":{},"args":{{"to":"a@example.com"}},"fails":4,"err":"smtp down","failed_at":{}}}"#,
        name,
        id,
        died_at - 60,
        died_at
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_waits_for_whole_frame() {
        let frame = b"*2\r\n$4\r\nLLEN\r\n$3\r\nkey\r\n";
        assert!(parse_command(&frame[..10]).is_none());

        let (args, used) = parse_command(frame).expect("whole frame");
        assert_eq!(args, vec!["LLEN", "key"]);
        assert_eq!(used, frame.len());
    }

    #[test]
    fn test_index_range_clamps_like_zrange() {
        assert_eq!(index_range(25, 0, 19), 0..20);
        assert_eq!(index_range(25, 20, 39), 20..25);
        assert_eq!(index_range(25, 40, 59), 0..0);
        assert_eq!(index_range(3, -1, -1), 2..3);
        assert_eq!(index_range(0, 0, -1), 0..0);
    }
}
