//! External tool invocation.
//!
//! All compilers (closure, minify, lessc, sass) are driven through the same
//! contract: argv in, stdout bytes out, with stderr either fatal (non-zero
//! exit) or logged as a warning (zero exit).

use crate::error::{Error, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run an external tool and return its stdout.
///
/// When `stdin` is given it is piped to the child; the write happens
/// concurrently with draining stdout so a chatty child can not deadlock the
/// pipe.
pub async fn run_tool(argv: &[String], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
    let (bin, args) = argv
        .split_first()
        .ok_or_else(|| Error::Other(anyhow::anyhow!("empty tool command line")))?;
    tracing::debug!(?argv, "invoking tool");

    let mut command = Command::new(bin);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if stdin.is_some() {
        command.stdin(Stdio::piped());
    }

    let mut child = command.spawn().map_err(|err| Error::Compile {
        argv: argv.to_vec(),
        stderr: format!("error spawning {bin}: {err}"),
    })?;

    let stdin_pipe = child.stdin.take();
    let input = stdin.map(<[u8]>::to_vec);
    let writer = tokio::spawn(async move {
        if let (Some(mut pipe), Some(input)) = (stdin_pipe, input) {
            // the child may exit without reading; nothing to do about a
            // broken pipe here, the exit status tells the real story
            let _ = pipe.write_all(&input).await;
            let _ = pipe.shutdown().await;
        }
    });

    let output = child.wait_with_output().await.map_err(|err| Error::Compile {
        argv: argv.to_vec(),
        stderr: format!("error waiting for {bin}: {err}"),
    })?;
    let _ = writer.await;

    if !output.status.success() {
        return Err(Error::Compile {
            argv: argv.to_vec(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    if !output.stderr.is_empty() {
        tracing::warn!(
            "{bin} stderr:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(output.stdout)
}

/// Build an argv from anything path- or string-shaped.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    parts
        .into_iter()
        .map(|part| part.as_ref().to_string_lossy().into_owned())
        .collect()
}
