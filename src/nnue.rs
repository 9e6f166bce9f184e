use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::state::{BLACK, WHITE};

// Network architecture: 768 input features -> 512 per perspective -> 1.
pub const INPUT_SIZE: usize = 768;
pub const LAYER1_SIZE: usize = 512;

const OUTPUT_DIVISOR: i32 = 40;

/// Network weights, loaded once and shared read-only for the lifetime of
/// the process. File layout is a raw little-endian i16 stream:
/// feature weights, feature biases, output weights, output bias.
#[repr(align(64))]
pub struct NnueWeights {
    pub feature_weights: Vec<i16>,
    pub feature_biases: [i16; LAYER1_SIZE],
    pub output_weights: [i16; 2 * LAYER1_SIZE],
    pub output_bias: i16,
}

pub fn expected_file_size() -> u64 {
    ((INPUT_SIZE * LAYER1_SIZE + LAYER1_SIZE + 2 * LAYER1_SIZE + 1) * 2) as u64
}

impl NnueWeights {
    pub fn load(path: &Path) -> io::Result<NnueWeights> {
        let f = File::open(path)?;
        let metadata = f.metadata()?;
        if metadata.len() != expected_file_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "network file size mismatch: expected {}, got {}",
                    expected_file_size(),
                    metadata.len()
                ),
            ));
        }

        let mut reader = BufReader::new(f);

        let mut feature_weights = vec![0i16; INPUT_SIZE * LAYER1_SIZE];
        read_i16_buf(&mut reader, &mut feature_weights)?;

        let mut feature_biases = [0i16; LAYER1_SIZE];
        read_i16_buf(&mut reader, &mut feature_biases)?;

        let mut output_weights = [0i16; 2 * LAYER1_SIZE];
        read_i16_buf(&mut reader, &mut output_weights)?;

        let mut output_bias = [0i16; 1];
        read_i16_buf(&mut reader, &mut output_bias)?;

        Ok(NnueWeights {
            feature_weights,
            feature_biases,
            output_weights,
            output_bias: output_bias[0],
        })
    }

    /// All-zero network. Search behavior stays well-defined (every quiet
    /// position evaluates to zero); used by tests and debug tooling.
    pub fn zeroed() -> NnueWeights {
        NnueWeights {
            feature_weights: vec![0; INPUT_SIZE * LAYER1_SIZE],
            feature_biases: [0; LAYER1_SIZE],
            output_weights: [0; 2 * LAYER1_SIZE],
            output_bias: 0,
        }
    }
}

fn read_i16_buf<Rd: Read>(reader: &mut Rd, buf: &mut [i16]) -> io::Result<()> {
    let byte_count = buf.len() * 2;
    let ptr = buf.as_mut_ptr() as *mut u8;
    let slice = unsafe { std::slice::from_raw_parts_mut(ptr, byte_count) };
    reader.read_exact(slice)?;
    if cfg!(target_endian = "big") {
        for x in buf {
            *x = x.to_le();
        }
    }
    Ok(())
}

/// Feature index of `(piece, sq)` from one side's perspective. The black
/// perspective flips ranks and swaps piece colors.
#[inline(always)]
pub fn make_index(perspective: usize, piece: usize, sq: usize) -> usize {
    let orient_sq = if perspective == WHITE { sq } else { sq ^ 56 };
    let piece_color = if piece < 6 { WHITE } else { BLACK };
    let piece_type = piece % 6;
    let rel_piece = if piece_color == perspective {
        piece_type
    } else {
        piece_type + 6
    };
    rel_piece * 64 + orient_sq
}

/// First-layer pre-activations, one vector per perspective. Kept in
/// lock-step with the position by incremental feature updates; a stack of
/// these is snapshotted alongside the position stack during search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(align(64))]
pub struct Accumulator {
    pub white: [i16; LAYER1_SIZE],
    pub black: [i16; LAYER1_SIZE],
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator {
            white: [0; LAYER1_SIZE],
            black: [0; LAYER1_SIZE],
        }
    }

    pub fn reset(&mut self, net: &NnueWeights) {
        self.white.copy_from_slice(&net.feature_biases);
        self.black.copy_from_slice(&net.feature_biases);
    }

    pub fn activate_feature(&mut self, sq: u8, piece: usize, net: &NnueWeights) {
        let w_off = make_index(WHITE, piece, sq as usize) * LAYER1_SIZE;
        let b_off = make_index(BLACK, piece, sq as usize) * LAYER1_SIZE;
        add_weights(&mut self.white, &net.feature_weights[w_off..w_off + LAYER1_SIZE]);
        add_weights(&mut self.black, &net.feature_weights[b_off..b_off + LAYER1_SIZE]);
    }

    pub fn deactivate_feature(&mut self, sq: u8, piece: usize, net: &NnueWeights) {
        let w_off = make_index(WHITE, piece, sq as usize) * LAYER1_SIZE;
        let b_off = make_index(BLACK, piece, sq as usize) * LAYER1_SIZE;
        sub_weights(&mut self.white, &net.feature_weights[w_off..w_off + LAYER1_SIZE]);
        sub_weights(&mut self.black, &net.feature_weights[b_off..b_off + LAYER1_SIZE]);
    }

    /// Fused add/subtract for the common case of one piece changing square.
    pub fn move_feature(&mut self, from: u8, to: u8, piece: usize, net: &NnueWeights) {
        let w_add = make_index(WHITE, piece, to as usize) * LAYER1_SIZE;
        let w_sub = make_index(WHITE, piece, from as usize) * LAYER1_SIZE;
        let b_add = make_index(BLACK, piece, to as usize) * LAYER1_SIZE;
        let b_sub = make_index(BLACK, piece, from as usize) * LAYER1_SIZE;
        add_sub_weights(
            &mut self.white,
            &net.feature_weights[w_add..w_add + LAYER1_SIZE],
            &net.feature_weights[w_sub..w_sub + LAYER1_SIZE],
        );
        add_sub_weights(
            &mut self.black,
            &net.feature_weights[b_add..b_add + LAYER1_SIZE],
            &net.feature_weights[b_sub..b_sub + LAYER1_SIZE],
        );
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn add_weights(vec: &mut [i16; LAYER1_SIZE], weights: &[i16]) {
    for i in 0..LAYER1_SIZE {
        vec[i] = vec[i].wrapping_add(weights[i]);
    }
}

#[inline(always)]
fn sub_weights(vec: &mut [i16; LAYER1_SIZE], weights: &[i16]) {
    for i in 0..LAYER1_SIZE {
        vec[i] = vec[i].wrapping_sub(weights[i]);
    }
}

#[inline(always)]
fn add_sub_weights(vec: &mut [i16; LAYER1_SIZE], add: &[i16], sub: &[i16]) {
    for i in 0..LAYER1_SIZE {
        vec[i] = vec[i].wrapping_add(add[i]).wrapping_sub(sub[i]);
    }
}

/// Raw network output in internal units, from the side to move's point of
/// view. The AVX2 and scalar paths produce identical integers: the i32
/// accumulation cannot overflow for quantized networks, so the summation
/// order does not matter.
pub fn evaluate(acc: &Accumulator, side_to_move: usize, net: &NnueWeights) -> i32 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            return unsafe { evaluate_avx2(acc, side_to_move, net) };
        }
    }
    evaluate_scalar(acc, side_to_move, net)
}

#[inline(always)]
fn crelu(x: i16) -> i32 {
    (x as i32).clamp(0, 255)
}

pub fn evaluate_scalar(acc: &Accumulator, side_to_move: usize, net: &NnueWeights) -> i32 {
    let (stm, opp) = if side_to_move == WHITE {
        (&acc.white, &acc.black)
    } else {
        (&acc.black, &acc.white)
    };

    let mut sum = net.output_bias as i32;
    for i in 0..LAYER1_SIZE {
        sum += crelu(stm[i]) * net.output_weights[i] as i32;
        sum += crelu(opp[i]) * net.output_weights[LAYER1_SIZE + i] as i32;
    }

    sum / OUTPUT_DIVISOR
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn evaluate_avx2(acc: &Accumulator, side_to_move: usize, net: &NnueWeights) -> i32 {
    use std::arch::x86_64::*;

    let (stm, opp) = if side_to_move == WHITE {
        (&acc.white, &acc.black)
    } else {
        (&acc.black, &acc.white)
    };

    let zero = _mm256_setzero_si256();
    let max = _mm256_set1_epi16(255);
    let mut sum_vec = _mm256_setzero_si256();

    for i in (0..LAYER1_SIZE).step_by(16) {
        let v = _mm256_loadu_si256(stm.as_ptr().add(i) as *const __m256i);
        let clamped = _mm256_min_epi16(_mm256_max_epi16(v, zero), max);
        let w = _mm256_loadu_si256(net.output_weights.as_ptr().add(i) as *const __m256i);
        sum_vec = _mm256_add_epi32(sum_vec, _mm256_madd_epi16(clamped, w));

        let v = _mm256_loadu_si256(opp.as_ptr().add(i) as *const __m256i);
        let clamped = _mm256_min_epi16(_mm256_max_epi16(v, zero), max);
        let w = _mm256_loadu_si256(
            net.output_weights.as_ptr().add(LAYER1_SIZE + i) as *const __m256i
        );
        sum_vec = _mm256_add_epi32(sum_vec, _mm256_madd_epi16(clamped, w));
    }

    (hsum_epi32(sum_vec) + net.output_bias as i32) / OUTPUT_DIVISOR
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn hsum_epi32(v: std::arch::x86_64::__m256i) -> i32 {
    use std::arch::x86_64::*;
    let v128 = _mm_add_epi32(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1));
    let v64 = _mm_add_epi32(v128, _mm_unpackhi_epi64(v128, v128));
    let v32 = _mm_add_epi32(v64, _mm_shuffle_epi32(v64, 0b00_00_00_01));
    _mm_cvtsi128_si32(v32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{GameState, Move, START_FEN};

    fn patterned_net() -> NnueWeights {
        let mut net = NnueWeights::zeroed();
        for (i, w) in net.feature_weights.iter_mut().enumerate() {
            *w = ((i * 7 + 3) % 23) as i16 - 11;
        }
        for (i, bias) in net.feature_biases.iter_mut().enumerate() {
            *bias = (i % 17) as i16 - 8;
        }
        for (i, w) in net.output_weights.iter_mut().enumerate() {
            *w = ((i * 13) % 31) as i16 - 15;
        }
        net.output_bias = 41;
        net
    }

    #[test]
    fn feature_indices_follow_perspective_symmetry() {
        use crate::state::{k, p, K, P};
        // White pawn on e2 seen by white == black pawn on e7 seen by black.
        assert_eq!(make_index(WHITE, P, 12), make_index(BLACK, p, 12 ^ 56));
        // Own king on e1 / e8 maps to the same feature either way.
        assert_eq!(make_index(WHITE, K, 4), make_index(BLACK, k, 60));
        // Enemy pieces land in the upper half of the feature space.
        assert!(make_index(WHITE, p, 0) >= 6 * 64);
        assert!(make_index(BLACK, P, 0) >= 6 * 64);
        assert!(make_index(BLACK, p, 63) < 6 * 64);
    }

    #[test]
    fn accumulator_delta_matches_full_refresh() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        let net = patterned_net();

        let mut state = GameState::parse_fen(START_FEN);
        let mut acc = Accumulator::new();
        state.refresh_accumulator(&mut acc, &net);

        // Short line with a pawn trade and a queen recapture
        let line = [
            Move::new(12, 28, None, false), // e2e4
            Move::new(51, 35, None, false), // d7d5
            Move::new(28, 35, None, true),  // exd5
            Move::new(59, 35, None, true),  // Qxd5
        ];
        for mv in line {
            state.do_move(mv, Some((&mut acc, &net)));
        }

        let mut fresh = Accumulator::new();
        state.refresh_accumulator(&mut fresh, &net);
        assert_eq!(acc, fresh);
    }

    #[test]
    fn delta_matches_refresh_through_castling_and_promotion() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        let net = patterned_net();

        let mut state =
            GameState::parse_fen("r3k2r/1P6/8/8/8/8/6p1/R3K2R w KQkq - 0 1");
        let mut acc = Accumulator::new();
        state.refresh_accumulator(&mut acc, &net);

        let line = [
            Move::new(49, 56, Some(crate::state::Q), true), // b7xa8=Q
            Move::new(60, 62, None, false),                 // ...O-O
            Move::new(4, 2, None, false),                   // O-O-O
            Move::new(14, 6, Some(crate::state::N), false), // ...g1=N
        ];
        for mv in line {
            state.do_move(mv, Some((&mut acc, &net)));
        }

        let mut fresh = Accumulator::new();
        state.refresh_accumulator(&mut fresh, &net);
        assert_eq!(acc, fresh);
    }

    #[test]
    fn scalar_and_dispatched_eval_agree() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        let net = patterned_net();

        let state = GameState::parse_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        );
        let mut acc = Accumulator::new();
        state.refresh_accumulator(&mut acc, &net);

        for side in [WHITE, BLACK] {
            assert_eq!(evaluate(&acc, side, &net), evaluate_scalar(&acc, side, &net));
        }
    }

    #[test]
    fn crelu_clamps_both_ends() {
        let mut net = NnueWeights::zeroed();
        net.output_weights[0] = 10;
        net.output_weights[1] = 10;
        net.output_weights[LAYER1_SIZE] = 1;

        let mut acc = Accumulator::new();
        acc.white[0] = -500;
        acc.white[1] = 400;
        acc.black[0] = 100;

        // stm=white: crelu(-500)=0, crelu(400)=255 -> 2550; opp adds 100
        assert_eq!(evaluate_scalar(&acc, WHITE, &net), (2550 + 100) / 40);
    }
}
