//! Channel remixing
//!
//! Maps decoder channel layouts onto what the hardware was opened with:
//! mono/stereo conversions, fixed-weight surround downmix to stereo, and a
//! zero-filling upmix for 5.0 material on 5.1 outputs. Weights are
//! integers scaled by 1000 with one final division per output sample.
//!
//! Decoder channel order is L R C LFE Ls Rs (Rl Rr), matching the ffmpeg
//! layouts the demuxer delivers.

use tracing::error;

/// Remix `input` frames from `in_channels` to `out_channels`.
///
/// The result replaces the contents of `output` and always holds exactly
/// `frames * out_channels` samples; an unsupported combination logs an
/// error and produces silence of that size. `input` must hold whole
/// frames.
pub fn remix(input: &[i16], in_channels: u32, out_channels: u32, output: &mut Vec<i16>) {
    output.clear();
    let in_ch = in_channels as usize;
    let out_ch = out_channels as usize;
    if in_ch == 0 || out_ch == 0 {
        return;
    }
    debug_assert_eq!(input.len() % in_ch, 0, "partial frame handed to remix");
    let frames = input.len() / in_ch;
    output.reserve(frames * out_ch);

    match (in_ch, out_ch) {
        (i, o) if i == o => output.extend_from_slice(input),
        (1, 2) => mono_to_stereo(input, output),
        (2, 1) => stereo_to_mono(input, output),
        (3..=8, 2) => surround_to_stereo(input, in_ch, output),
        (5, 6) => upmix(input, in_ch, out_ch, output),
        _ => {
            error!(
                "audio: unsupported {} -> {} channels remix",
                in_ch, out_ch
            );
            output.resize(frames * out_ch, 0);
        }
    }
}

/// Duplicate the mono channel into left and right.
fn mono_to_stereo(input: &[i16], output: &mut Vec<i16>) {
    for &s in input {
        output.push(s);
        output.push(s);
    }
}

/// Average left and right into a single channel.
fn stereo_to_mono(input: &[i16], output: &mut Vec<i16>) {
    for frame in input.chunks_exact(2) {
        output.push(((frame[0] as i32 + frame[1] as i32) / 2) as i16);
    }
}

/// Fixed-weight surround downmix to stereo.
fn surround_to_stereo(input: &[i16], in_ch: usize, output: &mut Vec<i16>) {
    for frame in input.chunks_exact(in_ch) {
        let f = |i: usize| frame[i] as i32;
        let (l, r) = match in_ch {
            // L R C
            3 => (f(0) * 600 + f(2) * 400, f(1) * 600 + f(2) * 400),
            // L R Ls Rs
            4 => (f(0) * 600 + f(2) * 400, f(1) * 600 + f(3) * 400),
            // L R Ls Rs C
            5 => (
                f(0) * 500 + f(2) * 200 + f(4) * 300,
                f(1) * 500 + f(3) * 200 + f(4) * 300,
            ),
            // L R Ls Rs C LFE
            6 => (
                f(0) * 400 + f(2) * 200 + f(4) * 300 + f(5) * 300,
                f(1) * 400 + f(3) * 200 + f(4) * 300 + f(5) * 100,
            ),
            // L R Ls Rs C Rl Rr
            7 => (
                f(0) * 400 + f(2) * 200 + f(4) * 300 + f(5) * 100,
                f(1) * 400 + f(3) * 200 + f(4) * 300 + f(6) * 100,
            ),
            // L R Ls Rs C LFE Rl Rr
            8 => (
                f(0) * 400 + f(2) * 150 + f(4) * 250 + f(5) * 100 + f(6) * 100,
                f(1) * 400 + f(3) * 150 + f(4) * 250 + f(5) * 100 + f(7) * 100,
            ),
            _ => unreachable!("dispatch only routes 3..=8 channels here"),
        };
        output.push((l / 1000) as i16);
        output.push((r / 1000) as i16);
    }
}

/// Copy the existing channels and zero-fill the missing ones.
fn upmix(input: &[i16], in_ch: usize, out_ch: usize, output: &mut Vec<i16>) {
    for frame in input.chunks_exact(in_ch) {
        output.extend_from_slice(frame);
        for _ in in_ch..out_ch {
            output.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every supported combination yields frames * out_channels samples.
    #[test]
    fn test_output_size_exact() {
        let cases: &[(u32, u32)] = &[
            (1, 1),
            (2, 2),
            (6, 6),
            (8, 8),
            (1, 2),
            (2, 1),
            (3, 2),
            (4, 2),
            (5, 2),
            (6, 2),
            (7, 2),
            (8, 2),
            (5, 6),
        ];
        for &(in_ch, out_ch) in cases {
            for frames in [0usize, 1, 7, 128] {
                let input = vec![100i16; frames * in_ch as usize];
                let mut output = Vec::new();
                remix(&input, in_ch, out_ch, &mut output);
                assert_eq!(
                    output.len(),
                    frames * out_ch as usize,
                    "{}ch -> {}ch with {} frames",
                    in_ch,
                    out_ch,
                    frames
                );
            }
        }
    }

    #[test]
    fn test_identity_copies() {
        let input = vec![1i16, -2, 3, -4, 5, -6];
        let mut output = Vec::new();
        remix(&input, 2, 2, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_mono_to_stereo() {
        let mut output = Vec::new();
        remix(&[10, -20], 1, 2, &mut output);
        assert_eq!(output, vec![10, 10, -20, -20]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut output = Vec::new();
        remix(&[100, 200, -100, 100], 2, 1, &mut output);
        assert_eq!(output, vec![150, 0]);
        // extremes stay in range
        let mut output = Vec::new();
        remix(&[i16::MAX, i16::MAX, i16::MIN, i16::MIN], 2, 1, &mut output);
        assert_eq!(output, vec![i16::MAX, i16::MIN]);
    }

    /// 5.1 downmix weights, including the asymmetric LFE contribution.
    #[test]
    fn test_five_one_downmix_weights() {
        let frame = [1000i16, 2000, 3000, 4000, 5000, 0];
        let mut output = Vec::new();
        remix(&frame, 6, 2, &mut output);
        let l = (1000 * 400 + 3000 * 200 + 5000 * 300 + 0 * 300) / 1000;
        let r = (2000 * 400 + 4000 * 200 + 5000 * 300 + 0 * 100) / 1000;
        assert_eq!(output, vec![l as i16, r as i16]);
        assert_eq!(output, vec![2500, 3100]);
    }

    #[test]
    fn test_five_one_downmix_lfe_asymmetry() {
        // only the LFE channel carries signal
        let frame = [0i16, 0, 0, 0, 0, 1000];
        let mut output = Vec::new();
        remix(&frame, 6, 2, &mut output);
        assert_eq!(output, vec![300, 100]);
    }

    #[test]
    fn test_seven_one_downmix_weights() {
        let frame = [1000i16, 1000, 1000, 1000, 1000, 1000, 1000, 1000];
        let mut output = Vec::new();
        remix(&frame, 8, 2, &mut output);
        let expect = (1000 * (400 + 150 + 250 + 100 + 100)) / 1000;
        assert_eq!(output, vec![expect as i16, expect as i16]);
    }

    #[test]
    fn test_upmix_zero_fills() {
        let frame = [1i16, 2, 3, 4, 5];
        let mut output = Vec::new();
        remix(&frame, 5, 6, &mut output);
        assert_eq!(output, vec![1, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn test_unsupported_combination_is_silence() {
        let input = vec![1234i16; 3 * 4];
        let mut output = Vec::new();
        remix(&input, 3, 4, &mut output);
        // 4 frames of silence in the output layout
        assert_eq!(output, vec![0i16; 16]);
    }
}
