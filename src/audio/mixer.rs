//! Sample-domain mixing and PCM conversion
//!
//! Sources are folded pairwise with `M = A + B - A*B`, which keeps the
//! result inside [-1, 1] without a final clamp. The formula is applied as
//! written for non-negative samples and mirrored for negative ones, so the
//! fold stays bounded for the full signed range.

use crate::error::AudioError;

/// Scale between 16-bit PCM and normalized floats
const PCM_SCALE: f32 = 32768.0;

/// Combine two normalized samples
///
/// `1 - (1-a)(1-b)` is `a + b - a*b` rearranged so that rounding can never
/// push the result past the rails.
#[inline]
pub fn mix_pair(a: f32, b: f32) -> f32 {
    if a >= 0.0 && b >= 0.0 {
        1.0 - (1.0 - a) * (1.0 - b)
    } else if a < 0.0 && b < 0.0 {
        (1.0 + a) * (1.0 + b) - 1.0
    } else {
        a + b
    }
}

/// Mix equal-length sources into one frame
///
/// A single source is returned unchanged. Callers substitute silence
/// themselves when there is nothing to mix; an empty slice yields an
/// empty frame.
pub fn mix(sources: &[Vec<f32>]) -> Result<Vec<f32>, AudioError> {
    let Some((first, rest)) = sources.split_first() else {
        return Ok(Vec::new());
    };

    let mut accumulator = first.clone();
    for source in rest {
        if source.len() != accumulator.len() {
            return Err(AudioError::FrameMismatch {
                expected: accumulator.len(),
                actual: source.len(),
            });
        }
        for (acc, &sample) in accumulator.iter_mut().zip(source) {
            *acc = mix_pair(*acc, sample);
        }
    }

    Ok(accumulator)
}

/// Fold interleaved multi-channel samples down to mono
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            frame[1..]
                .iter()
                .fold(frame[0], |acc, &sample| mix_pair(acc, sample))
        })
        .collect()
}

/// Broadcast mono samples into `channels` interleaved channels
pub fn upmix(mono: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return mono.to_vec();
    }

    let mut out = Vec::with_capacity(mono.len() * channels);
    for &sample in mono {
        out.extend(std::iter::repeat(sample).take(channels));
    }
    out
}

/// Convert 16-bit PCM to normalized floats
pub fn pcm_to_float(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / PCM_SCALE).collect()
}

/// Convert normalized floats to 16-bit PCM, saturating at the rails
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    // `as` saturates, so +1.0 maps to i16::MAX
    samples.iter().map(|&s| (s * PCM_SCALE) as i16).collect()
}

/// Largest absolute amplitude in a frame
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |max, &s| max.max(s.abs()))
}

/// Check whether a PCM frame carries any signal at all
pub fn is_silent(pcm: &[i16]) -> bool {
    pcm.iter().all(|&s| s == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_source_unchanged() {
        let source = vec![0.1, -0.5, 0.9, 0.0];
        let mixed = mix(&[source.clone()]).unwrap();
        assert_eq!(mixed, source);
    }

    #[test]
    fn test_silent_sources_mix_to_silence() {
        let mixed = mix(&[vec![0.0; 8], vec![0.0; 8]]).unwrap();
        assert_eq!(mixed, vec![0.0; 8]);
    }

    #[test]
    fn test_mix_is_not_a_plain_sum() {
        let mixed = mix(&[vec![0.5], vec![0.5]]).unwrap();
        assert_eq!(mixed, vec![0.75]);

        let mixed = mix(&[vec![-0.5], vec![-0.5]]).unwrap();
        assert_eq!(mixed, vec![-0.75]);

        let mixed = mix(&[vec![0.5], vec![-0.25]]).unwrap();
        assert_eq!(mixed, vec![0.25]);
    }

    #[test]
    fn test_full_scale_stays_in_range() {
        let mixed = mix(&[vec![1.0, -1.0], vec![1.0, -1.0], vec![1.0, -1.0]]).unwrap();
        assert_eq!(mixed, vec![1.0, -1.0]);
    }

    #[test]
    fn test_length_mismatch() {
        let err = mix(&[vec![0.0; 4], vec![0.0; 3]]).unwrap_err();
        assert!(matches!(
            err,
            AudioError::FrameMismatch { expected: 4, actual: 3 }
        ));
    }

    #[test]
    fn test_downmix_and_upmix() {
        let stereo = vec![0.5, 0.5, 0.0, 0.25];
        assert_eq!(downmix(&stereo, 2), vec![0.75, 0.25]);
        assert_eq!(downmix(&stereo, 1), stereo);

        assert_eq!(upmix(&[0.1, 0.2], 3), vec![0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_pcm_conversion() {
        assert_eq!(pcm_to_float(&[0, 16384, -32768]), vec![0.0, 0.5, -1.0]);
        assert_eq!(float_to_pcm(&[0.0, 0.5, -1.0, 1.0]), vec![0, 16384, -32768, 32767]);
    }

    #[test]
    fn test_silence_detection() {
        assert!(is_silent(&[0, 0, 0]));
        assert!(!is_silent(&[0, -1, 0]));
        assert_eq!(peak(&[0.1, -0.7, 0.3]), 0.7);
    }

    proptest! {
        #[test]
        fn prop_mix_output_bounded(
            sources in prop::collection::vec(
                prop::collection::vec(-1.0f32..=1.0, 16),
                1..8,
            ),
        ) {
            let mixed = mix(&sources).unwrap();
            prop_assert_eq!(mixed.len(), 16);
            for sample in mixed {
                prop_assert!((-1.0..=1.0).contains(&sample));
            }
        }
    }
}
