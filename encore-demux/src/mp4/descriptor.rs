//! MPEG-4 elementary stream descriptors (the `esds` box payload).

use byteorder::BE;

use encore_common::io::ByteReader;
use encore_common::{Error, Result};

use crate::format::{CodecFormat, CodecId};
use crate::mp4::audio::parse_audio_specific_config;

/// Reads an expandable descriptor length: up to four 7-bit groups with a
/// continuation bit.
pub(crate) fn read_descriptor_length(r: &mut ByteReader<'_>) -> Result<u32> {
    let mut length = 0u32;
    let mut remain = r.remaining().min(4);

    while remain > 0 {
        remain -= 1;
        let byte = r.get::<u8, BE>()?;
        length = (length << 7) | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(length)
}

fn read_descriptor_header(r: &mut ByteReader<'_>) -> Result<(u8, u32)> {
    let tag = r.get::<u8, BE>()?;
    let len = read_descriptor_length(r)?;
    Ok((tag, len))
}

/// The DecoderConfigDescriptor: object type, bit rates and the
/// DecoderSpecificInfo blob (an AudioSpecificConfig for AAC).
#[derive(Debug, Clone, Default)]
pub struct DecoderConfigDescriptor {
    pub object_type_indication: u8,
    pub maximum_bit_rate: u32,
    pub average_bit_rate: u32,
    pub dsi: Vec<u8>,
}

impl DecoderConfigDescriptor {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(body);
        let mut dcd = DecoderConfigDescriptor::default();

        let (tag, _len) = read_descriptor_header(&mut r)?;
        if tag == 0x03 {
            // ES_Descriptor: ES_id, then optional dependsOn/URL/OCR fields.
            r.skip(2)?;
            let flags = r.get::<u8, BE>()?;
            if flags & 0x80 != 0 {
                r.skip(2)?;
            }
            if flags & 0x40 != 0 {
                let url_len = r.get::<u8, BE>()?;
                r.skip(usize::from(url_len))?;
            }
            if flags & 0x20 != 0 {
                r.skip(2)?;
            }
        } else {
            r.skip(2)?;
        }

        let (tag, _len) = read_descriptor_header(&mut r)?;
        if tag == 0x04 {
            dcd.object_type_indication = r.get::<u8, BE>()?;
            r.skip(1 + 3)?; // stream type/flags, buffer size
            dcd.maximum_bit_rate = r.get::<u32, BE>()?;
            dcd.average_bit_rate = r.get::<u32, BE>()?;

            let (tag, len) = read_descriptor_header(&mut r)?;
            if tag == 0x05 {
                dcd.dsi = r.get_bytes(len as usize)?.to_vec();
            }
        }
        Ok(dcd)
    }

    /// Applies the descriptor to a codec format, parsing the contained
    /// AudioSpecificConfig for MPEG-4 audio object types.
    pub fn setup(&self, fmt: &mut CodecFormat) -> Result<()> {
        fmt.extra = self.dsi.clone();
        match self.object_type_indication {
            0x40 | 0x66 | 0x67 | 0x68 => parse_audio_specific_config(fmt)?,
            0x69 | 0x6b => fmt.codec_id = CodecId::MpegLayer3,
            0xa5 => fmt.codec_id = CodecId::Ac3,
            0xa6 => fmt.codec_id = CodecId::Eac3,
            0xa9 => fmt.codec_id = CodecId::Dts,
            0xaa | 0xab => fmt.codec_id = CodecId::DtsHd,
            0xac => fmt.codec_id = CodecId::DtsExpress,
            0xad => fmt.codec_id = CodecId::Opus,
            0xdd => fmt.codec_id = CodecId::Vorbis,
            0xe1 => fmt.codec_id = CodecId::Qcelp,
            other => {
                return Err(Error::unsupported_format(format!(
                    "unrecognized MPEG-4 object type indication: {other:#04x}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_lengths_use_continuation_bits() {
        let mut r = ByteReader::new(&[0x05]);
        assert_eq!(read_descriptor_length(&mut r).unwrap(), 5);

        let mut r = ByteReader::new(&[0x81, 0x05]);
        assert_eq!(read_descriptor_length(&mut r).unwrap(), 0x85);

        // Terminates after four bytes even with the continuation bit set.
        let mut r = ByteReader::new(&[0xff, 0xff, 0xff, 0xff, 0x70]);
        read_descriptor_length(&mut r).unwrap();
        assert_eq!(r.position(), 4);
    }

    #[test]
    fn parses_an_aac_lc_es_descriptor() {
        // ES_Descriptor > DecoderConfigDescriptor > DecoderSpecificInfo
        // with a 44.1 kHz stereo AAC-LC AudioSpecificConfig (0x12 0x10).
        let body = [
            0x03, 0x19, // ES_Descriptor, length
            0x00, 0x01, 0x00, // ES_id, flags
            0x04, 0x11, // DecoderConfigDescriptor, length
            0x40, // object type: MPEG-4 audio
            0x15, 0x00, 0x00, 0x00, // stream type, buffer size
            0x00, 0x01, 0xf4, 0x00, // maximum bit rate
            0x00, 0x01, 0x77, 0x00, // average bit rate
            0x05, 0x02, // DecoderSpecificInfo, length
            0x12, 0x10,
        ];
        let dcd = DecoderConfigDescriptor::parse(&body).unwrap();
        assert_eq!(dcd.object_type_indication, 0x40);
        assert_eq!(dcd.average_bit_rate, 96_000);
        assert_eq!(dcd.dsi, vec![0x12, 0x10]);

        let mut fmt = CodecFormat::default();
        dcd.setup(&mut fmt).unwrap();
        assert_eq!(fmt.codec_id, CodecId::AacLc);
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.frames_per_packet, 1024);
    }
}
