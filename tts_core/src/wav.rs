use base64::{engine::general_purpose, Engine as _};

/// Wrap raw PCM (s16le, mono) in a RIFF/WAVE container.
///
/// The result is a complete, independently decodable file: a 44-byte header
/// followed by the payload unchanged. The size fields cover exactly this
/// payload, so a concatenation of outputs stays parseable file by file.
pub fn encode_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let byte_rate: u32 = sample_rate * num_channels as u32 * (bits_per_sample as u32 / 8);
    let block_align: u16 = num_channels * (bits_per_sample / 8);
    let data_size: u32 = pcm.len() as u32;
    let riff_size: u32 = 36 + data_size;

    let mut out = Vec::<u8>::with_capacity(44 + pcm.len());

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Same container, Base64-encoded for JSON transport.
pub fn encode_wav_base64(pcm: &[u8], sample_rate: u32) -> String {
    general_purpose::STANDARD.encode(encode_wav(pcm, sample_rate))
}
