//! Server-side scripting. Replies are returned as the store sent them; only
//! error replies are turned into failures.

use crate::client::{IntArg, StoreClient};
use crate::command::CommandResult;
use crate::resp::RespValue;

impl StoreClient {
    /// Runs a script with its key and argument groups (`EVAL`).
    pub fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> CommandResult<RespValue> {
        let numkeys = IntArg::from(keys.len());
        let command = script_args(b"EVAL", script, &numkeys, keys, args);
        self.run("EVAL", script_label(keys), |conn| conn.exec(&command)?.into_reply())
    }

    /// Caches a script on the store and returns its SHA1 digest.
    pub fn script_load(&self, script: &str) -> CommandResult<Option<String>> {
        let command: [&[u8]; 3] = [b"SCRIPT", b"LOAD", script.as_bytes()];
        self.run("SCRIPT LOAD", "", |conn| conn.exec(&command)?.into_text())
    }

    /// Runs a script previously cached with `script_load` (`EVALSHA`).
    pub fn evalsha(&self, sha: &str, keys: &[&str], args: &[&str]) -> CommandResult<RespValue> {
        let numkeys = IntArg::from(keys.len());
        let command = script_args(b"EVALSHA", sha, &numkeys, keys, args);
        self.run("EVALSHA", script_label(keys), |conn| conn.exec(&command)?.into_reply())
    }
}

fn script_args<'a>(
    name: &'static [u8],
    body: &'a str,
    numkeys: &'a IntArg,
    keys: &[&'a str],
    args: &[&'a str],
) -> Vec<&'a [u8]> {
    let mut command: Vec<&[u8]> = Vec::with_capacity(3 + keys.len() + args.len());
    command.push(name);
    command.push(body.as_bytes());
    command.push(numkeys.as_bytes());
    command.extend(keys.iter().map(|key| key.as_bytes()));
    command.extend(args.iter().map(|arg| arg.as_bytes()));
    command
}

fn script_label<'a>(keys: &[&'a str]) -> &'a str {
    keys.first().copied().unwrap_or("")
}
