//! Human mode prints strings as-is and everything else pretty-printed.
//! JSON mode wraps the response in `{ "data": ... }`.

use anyhow::Result;
use serde_json::{Value, json};

use crate::opts::GlobalOpts;

pub fn print_success(opts: &GlobalOpts, data: Value) -> Result<()> {
    if opts.pretty {
        println!("{}", serde_json::to_string_pretty(&json!({ "data": data }))?);
    } else if opts.json {
        println!("{}", serde_json::to_string(&json!({ "data": data }))?);
    } else {
        match data {
            Value::String(s) => println!("{s}"),
            other => println!("{}", serde_json::to_string_pretty(&other)?),
        }
    }
    Ok(())
}
