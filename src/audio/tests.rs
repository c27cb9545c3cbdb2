use super::*;

fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn wav_bytes(channels: u16, sample_rate: u32, frames: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in frames {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[test]
fn test_raw_pcm_fallback_is_bit_exact() {
    let buffer = AudioDecoder::decode(&encode(&[0x00, 0x00, 0xFF, 0x7F]), None).unwrap();

    assert_eq!(buffer.strategy, DecodeStrategy::RawPcm);
    assert_eq!(buffer.channels, 1);
    assert_eq!(buffer.sample_rate, 24_000);
    assert_eq!(buffer.samples[0], vec![0.0, 32767.0 / 32768.0]);
}

#[test]
fn test_raw_pcm_drops_trailing_odd_byte() {
    let buffer = AudioDecoder::decode(&encode(&[0x00, 0x80, 0x01]), None).unwrap();

    assert_eq!(buffer.frames(), 1);
    assert_eq!(buffer.samples[0][0], -1.0);
}

#[test]
fn test_raw_pcm_hint_skips_container() {
    let wav = wav_bytes(1, 8000, &[100, 200]);
    let buffer = AudioDecoder::decode(&encode(&wav), Some(DecodeStrategy::RawPcm)).unwrap();

    // The WAV header itself is read as samples
    assert_eq!(buffer.strategy, DecodeStrategy::RawPcm);
    assert_eq!(buffer.frames(), wav.len() / 2);
}

#[test]
fn test_container_decode_wav() {
    let wav = wav_bytes(2, 16_000, &[0, 0, 16384, -16384, 32767, -32768]);
    let buffer = AudioDecoder::decode(&encode(&wav), None).unwrap();

    assert_eq!(buffer.strategy, DecodeStrategy::Container);
    assert_eq!(buffer.channels, 2);
    assert_eq!(buffer.sample_rate, 16_000);
    assert_eq!(buffer.frames(), 3);
    assert!((buffer.samples[0][1] - 0.5).abs() < 1e-4);
    assert!((buffer.samples[1][1] + 0.5).abs() < 1e-4);
    assert!(buffer.samples.iter().flatten().all(|s| (-1.0..=1.0).contains(s)));
}

#[test]
fn test_both_strategies_fail() {
    let err = AudioDecoder::decode(&encode(&[0x42]), None).unwrap_err();
    match err {
        DecodeError::Undecodable(reasons) => {
            let strategies: Vec<DecodeStrategy> = reasons.iter().map(|(s, _)| *s).collect();
            assert_eq!(strategies, vec![DecodeStrategy::Container, DecodeStrategy::RawPcm]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_invalid_base64() {
    let err = AudioDecoder::decode("not base64!!", None).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidBase64(_)));
}

#[test]
fn test_deinterleave() {
    let channels = deinterleave(&[1.0, -1.0, 0.5, -0.5], 2);
    assert_eq!(channels, vec![vec![1.0, 0.5], vec![-1.0, -0.5]]);
}
