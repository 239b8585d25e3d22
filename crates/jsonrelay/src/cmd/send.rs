use jsonrelay_frame::{Frame, FrameWriter};
use jsonrelay_transport::SerialSettings;
use serde::Serialize;

use crate::cmd::{Context, SendArgs};
use crate::exit::{
    frame_error, io_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS,
};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct SendOutput<'a> {
    port: &'a str,
    bytes: usize,
}

pub fn run(args: SendArgs, ctx: &Context) -> CliResult<i32> {
    let text = match (&args.json, &args.file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("reading {} failed", path.display()), err))?,
        (None, None) => return Err(CliError::new(DATA_INVALID, "no JSON payload given")),
    };

    let frame = encode(&text)?;

    let settings = SerialSettings {
        baud_rate: args.baud,
        ..SerialSettings::default()
    };
    let link = ctx
        .backend()
        .opener
        .open(&args.port, &settings)
        .map_err(|err| transport_error("open failed", err))?;
    let mut writer = FrameWriter::new(link);
    writer
        .write_frame(&frame)
        .and_then(|()| writer.flush())
        .map_err(|err| frame_error("send failed", err))?;

    match ctx.format {
        OutputFormat::Json => print_json(&SendOutput {
            port: args.port.as_str(),
            bytes: frame.len(),
        }),
        OutputFormat::Raw => {}
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Sent {} bytes to {}.", frame.len(), args.port);
        }
    }
    Ok(SUCCESS)
}

/// Check that `text` is one JSON object and frame its bytes unchanged.
fn encode(text: &str) -> CliResult<Frame> {
    let text = text.trim();
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid JSON: {err}")))?;
    if !value.is_object() {
        return Err(CliError::new(
            DATA_INVALID,
            "payload must be a JSON object",
        ));
    }
    Frame::from_slice(text.as_bytes()).map_err(|err| frame_error("invalid frame", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_keeps_payload_bytes() {
        let frame = encode("{\"b\":1,\"a\":2}").unwrap();
        assert_eq!(frame.as_bytes(), b"{\"b\":1,\"a\":2}");

        let frame = encode("  { \"a\" : [1, 2] }\n").unwrap();
        assert_eq!(frame.as_bytes(), b"{ \"a\" : [1, 2] }");
    }

    #[test]
    fn encode_rejects_non_objects_and_bad_json() {
        assert_eq!(encode("[1,2]").unwrap_err().code, DATA_INVALID);
        assert_eq!(encode("{\"a\":").unwrap_err().code, DATA_INVALID);
    }
}
