//! RTP header handling and the voice UDP IP-discovery exchange.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::{Error, Result};

/// Fixed RTP header length before csrc/extension words.
pub const BASE_HEADER_LEN: usize = 12;

/// Length of the discovery request and response packets.
pub const DISCOVERY_LEN: usize = 74;

/// Opus payloads carry an RTP extension preamble this long.
pub const OPUS_PREAMBLE_LEN: usize = 8;

/// A parsed view into one received RTP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Header bytes, used as AEAD associated data.
    pub header: &'a [u8],
    /// Encrypted payload between header and trailing counter.
    pub ciphertext: &'a [u8],
    /// Trailing 4-byte packet counter, copied into the nonce.
    pub counter: [u8; 4],
}

/// Split a datagram into header, ciphertext and trailing counter.
///
/// The header length accounts for csrc words (`byte0 & 0x0F`) and one
/// extension word when the extension bit is set.
pub fn parse(data: &[u8]) -> Result<RtpPacket<'_>> {
    if data.len() < BASE_HEADER_LEN + 4 {
        return Err(Error::Protocol("rtp datagram too short"));
    }

    let mut cutoff = BASE_HEADER_LEN + (data[0] & 0x0F) as usize * 4;
    if data[0] & 0x10 != 0 {
        cutoff += 4;
    }
    if data.len() < cutoff + 4 {
        return Err(Error::Protocol("rtp datagram shorter than its header"));
    }

    let mut counter = [0u8; 4];
    counter.copy_from_slice(&data[data.len() - 4..]);

    Ok(RtpPacket {
        sequence: BigEndian::read_u16(&data[2..4]),
        timestamp: BigEndian::read_u32(&data[4..8]),
        ssrc: BigEndian::read_u32(&data[8..12]),
        header: &data[..cutoff],
        ciphertext: &data[cutoff..data.len() - 4],
        counter,
    })
}

/// RTCP packets share the socket; they carry a payload type of 200-204 in
/// the second byte and are not audio.
pub fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && (200..=204).contains(&data[1])
}

/// Encode the 74-byte IP discovery request for an ssrc.
pub fn encode_discovery_request(ssrc: u32) -> [u8; DISCOVERY_LEN] {
    let mut packet = [0u8; DISCOVERY_LEN];
    {
        let mut cursor = &mut packet[..];
        cursor.write_u16::<BigEndian>(1).unwrap();
        cursor.write_u16::<BigEndian>(70).unwrap();
        cursor.write_u32::<BigEndian>(ssrc).unwrap();
    }
    packet
}

/// Decode the discovery response, returning the client's external address.
pub fn decode_discovery_response(data: &[u8], ssrc: u32) -> Result<(String, u16)> {
    if data.len() < DISCOVERY_LEN {
        return Err(Error::Protocol("short ip discovery response"));
    }
    let mut cursor = &data[..];
    if cursor.read_u16::<BigEndian>()? != 2 || cursor.read_u16::<BigEndian>()? != 70 {
        return Err(Error::Protocol("malformed ip discovery response"));
    }
    if cursor.read_u32::<BigEndian>()? != ssrc {
        return Err(Error::Protocol("ip discovery response for foreign ssrc"));
    }

    let (addr, mut rest) = cursor.split_at(64);
    let end = addr.iter().position(|&b| b == 0).unwrap_or(addr.len());
    let ip = std::str::from_utf8(&addr[..end])
        .map_err(|_| Error::Protocol("non-ascii ip in discovery response"))?
        .to_owned();
    let port = rest.read_u16::<BigEndian>()?;
    Ok((ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery_response(ssrc: u32, ip: &str, port: u16) -> Vec<u8> {
        let mut packet = vec![0u8; DISCOVERY_LEN];
        BigEndian::write_u16(&mut packet[0..2], 2);
        BigEndian::write_u16(&mut packet[2..4], 70);
        BigEndian::write_u32(&mut packet[4..8], ssrc);
        packet[8..8 + ip.len()].copy_from_slice(ip.as_bytes());
        BigEndian::write_u16(&mut packet[72..74], port);
        packet
    }

    #[test]
    fn discovery_round_trip() {
        let ssrc = 0x0102_0304;
        let request = encode_discovery_request(ssrc);
        assert_eq!(request.len(), DISCOVERY_LEN);
        assert_eq!(&request[0..4], &[0, 1, 0, 70]);
        assert_eq!(BigEndian::read_u32(&request[4..8]), ssrc);

        let response = discovery_response(ssrc, "203.0.113.7", 50004);
        let (ip, port) = decode_discovery_response(&response, ssrc).unwrap();
        assert_eq!(ip, "203.0.113.7");
        assert_eq!(port, 50004);
    }

    #[test]
    fn discovery_rejects_foreign_ssrc() {
        let response = discovery_response(7, "203.0.113.7", 50004);
        assert!(decode_discovery_response(&response, 8).is_err());
    }

    #[test]
    fn parse_splits_header_and_counter() {
        // version 2, no csrc, no extension
        let mut data = vec![0x80, 0x78];
        data.extend_from_slice(&[0x00, 0x2A]); // sequence 42
        data.extend_from_slice(&[0, 0, 0x03, 0xE8]); // timestamp 1000
        data.extend_from_slice(&[0, 0, 0, 0x05]); // ssrc 5
        data.extend_from_slice(b"ciphertextbytes");
        data.extend_from_slice(&[9, 9, 9, 9]); // counter

        let packet = parse(&data).unwrap();
        assert_eq!(packet.sequence, 42);
        assert_eq!(packet.timestamp, 1000);
        assert_eq!(packet.ssrc, 5);
        assert_eq!(packet.header.len(), BASE_HEADER_LEN);
        assert_eq!(packet.ciphertext, b"ciphertextbytes");
        assert_eq!(packet.counter, [9, 9, 9, 9]);
    }

    #[test]
    fn parse_honors_csrc_and_extension_bits() {
        // two csrc words and the extension bit
        let mut data = vec![0x92, 0x78];
        data.extend_from_slice(&[0u8; 10]); // rest of base header
        data.extend_from_slice(&[0u8; 12]); // 2 csrc + 1 extension word
        data.extend_from_slice(b"payload");
        data.extend_from_slice(&[1, 2, 3, 4]);

        let packet = parse(&data).unwrap();
        assert_eq!(packet.header.len(), BASE_HEADER_LEN + 12);
        assert_eq!(packet.ciphertext, b"payload");
    }

    #[test]
    fn rtcp_filter() {
        assert!(is_rtcp(&[0x80, 200]));
        assert!(is_rtcp(&[0x80, 204]));
        assert!(!is_rtcp(&[0x80, 0x78]));
    }
}
