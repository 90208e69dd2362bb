//! Human-readable command names for the packet log
//!
//! Lookup is two-level: a server-specific table first, then the COMMON
//! table for codes seen on multiple servers. The character server speaks
//! the login protocol, so it shares the login table; the data server
//! likewise shares the patch table.

/// Resolve a command code against the tables for `server`.
pub fn packet_name(server: &str, command: u16) -> Option<&'static str> {
    server_name(server, command).or_else(|| common_name(command))
}

fn server_name(server: &str, command: u16) -> Option<&'static str> {
    match server {
        "PATCH" | "DATA" => patch_name(command),
        "LOGIN" | "CHARACTER" => login_name(command),
        _ => None,
    }
}

fn patch_name(command: u16) -> Option<&'static str> {
    Some(match command {
        0x02 => "PatchWelcomeType",
        0x04 => "PatchLoginType",
        0x06 => "PatchFileHeaderType",
        0x07 => "PatchFileChunkType",
        0x08 => "PatchFileCompleteType",
        0x09 => "PatchChangeDirType",
        0x0A => "PatchDirAboveType",
        0x0B => "PatchDataAckType",
        0x0C => "PatchCheckFileType",
        0x0D => "PatchFileListDoneType",
        0x0F => "PatchFileStatusType",
        0x10 => "PatchClientListDoneType",
        0x11 => "PatchUpdateFilesType",
        0x12 => "PatchUpdateCompleteType",
        0x13 => "PatchMessageType",
        0x14 => "PatchRedirectType",
        _ => return None,
    })
}

fn login_name(command: u16) -> Option<&'static str> {
    Some(match command {
        0x1A => "LoginClientMessageType",
        0x93 => "LoginType",
        0xA0 => "LoginShipListType",
        0xB1 => "LoginTimestampType",
        0xE0 => "LoginOptionsRequestType",
        0xE2 => "LoginOptionsType",
        0xE3 => "LoginCharPreviewReqType",
        0xE4 => "LoginCharAckType",
        0xE5 => "LoginCharPreviewType",
        0xE6 => "LoginSecurityType",
        0xEC => "LoginSetFlagType",
        0xEE => "LoginScrollMessageType",
        0x01DC => "LoginGuildcardHeaderType",
        0x02DC => "LoginGuildcardChunkType",
        0x03DC => "LoginGuildcardChunkReqType",
        0x01E8 => "LoginChecksumType",
        0x02E8 => "LoginChecksumAckType",
        0x03E8 => "LoginGuildcardReqType",
        0x01EB => "LoginParameterHeaderType",
        0x02EB => "LoginParameterChunkType",
        0x03EB => "LoginParameterChunkReqType",
        0x04EB => "LoginParameterHeaderReqType",
        _ => return None,
    })
}

/// Packets found on multiple servers.
fn common_name(command: u16) -> Option<&'static str> {
    Some(match command {
        0x05 => "DisconnectType",
        0x07 => "BlockListType",
        0x10 => "MenuSelectType",
        0x19 => "RedirectType",
        0x83 => "LobbyListType",
        _ => return None,
    })
}
