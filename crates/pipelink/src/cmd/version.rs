use pipelink_frame::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use pipelink_peer::HandshakeConfig;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("pipelink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let handshake = HandshakeConfig::default();
    println!("name: pipelink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("PIPELINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "protocol: {} {}",
        handshake.protocol_name, handshake.protocol_version
    );
    println!("frame_header: {HEADER_SIZE} bytes, little-endian length");
    println!("max_payload: {DEFAULT_MAX_PAYLOAD} bytes");

    Ok(SUCCESS)
}
