/// Size of the canonical reading paper the conversion table is calibrated against.
pub const CANONICAL_QUESTION_COUNT: u32 = 40;

pub const MAX_BAND: f32 = 9.0;

/// Lowest raw score (out of 40) that earns each band, ascending by raw score.
///
/// Raw scores below the first entry earn band 0.
static READING_BAND_TABLE: [(u32, f32); 14] = [
    (4, 2.5),
    (6, 3.0),
    (8, 3.5),
    (10, 4.0),
    (13, 4.5),
    (15, 5.0),
    (19, 5.5),
    (23, 6.0),
    (26, 6.5),
    (30, 7.0),
    (33, 7.5),
    (35, 8.0),
    (37, 8.5),
    (39, 9.0),
];

/// Scale `correct` out of `total` onto the 40 question paper, rounding half away from zero.
pub fn scale_to_canonical(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    if total == CANONICAL_QUESTION_COUNT {
        return correct;
    }

    let ratio = f64::from(correct) / f64::from(total);
    (ratio * f64::from(CANONICAL_QUESTION_COUNT)).round() as u32
}

/// Convert a raw reading score into a band on the 0, 2.5 ..= 9.0 scale.
///
/// Lookup takes the greatest table entry at or below the scaled score, so the band never
/// increases as the scaled score decreases, including across gaps in the table.
pub fn raw_score_to_band(correct: u32, total: u32) -> f32 {
    if total == 0 {
        return 0.0;
    }

    let scaled = scale_to_canonical(correct, total);
    if scaled == 0 {
        return 0.0;
    }
    if scaled >= CANONICAL_QUESTION_COUNT {
        return MAX_BAND;
    }

    band_for_scaled(scaled)
}

fn band_for_scaled(scaled: u32) -> f32 {
    let upper = READING_BAND_TABLE.partition_point(|(threshold, _)| *threshold <= scaled);
    match upper.checked_sub(1) {
        Some(index) => READING_BAND_TABLE[index].1,
        None => 0.0,
    }
}

/// Round to the nearest half band, halves rounding up (6.25 -> 6.5, 6.75 -> 7.0).
pub fn round_to_half_band(value: f32) -> f32 {
    (value * 2.0).round() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert_eq!(raw_score_to_band(0, 40), 0.0);
        assert_eq!(raw_score_to_band(40, 40), 9.0);
        assert_eq!(raw_score_to_band(0, 0), 0.0);
        assert_eq!(raw_score_to_band(7, 0), 0.0);
    }

    #[test]
    fn proportional_scaling_reaches_the_ceiling() {
        assert_eq!(raw_score_to_band(20, 20), raw_score_to_band(40, 40));
        assert_eq!(raw_score_to_band(3, 4), 7.0);
        assert_eq!(scale_to_canonical(3, 4), 30);
    }

    #[test]
    fn scaling_rounds_halves_up() {
        // 1/16 * 40 = 2.5
        assert_eq!(scale_to_canonical(1, 16), 3);
        // 7/16 * 40 = 17.5
        assert_eq!(scale_to_canonical(7, 16), 18);
    }

    #[test]
    fn matches_every_table_row_on_the_canonical_scale() {
        let expected = [
            (39, 9.0),
            (38, 8.5),
            (37, 8.5),
            (36, 8.0),
            (34, 7.5),
            (31, 7.0),
            (30, 7.0),
            (29, 6.5),
            (26, 6.5),
            (25, 6.0),
            (23, 6.0),
            (22, 5.5),
            (19, 5.5),
            (18, 5.0),
            (15, 5.0),
            (14, 4.5),
            (13, 4.5),
            (12, 4.0),
            (10, 4.0),
            (9, 3.5),
            (8, 3.5),
            (7, 3.0),
            (6, 3.0),
            (5, 2.5),
            (4, 2.5),
        ];
        for (raw, band) in expected {
            assert_eq!(raw_score_to_band(raw, 40), band, "raw score {raw}");
        }
    }

    #[test]
    fn scores_below_the_table_collapse_to_zero() {
        assert_eq!(raw_score_to_band(3, 40), 0.0);
        assert_eq!(raw_score_to_band(1, 40), 0.0);
    }

    #[test]
    fn band_never_decreases_as_correct_answers_increase() {
        for total in 1..=60 {
            let mut previous = 0.0;
            for correct in 0..=total {
                let band = raw_score_to_band(correct, total);
                assert!(
                    band >= previous,
                    "band dropped from {previous} to {band} at {correct}/{total}"
                );
                previous = band;
            }
        }
    }

    #[test]
    fn half_band_rounding() {
        assert_eq!(round_to_half_band(6.25), 6.5);
        assert_eq!(round_to_half_band(6.75), 7.0);
        assert_eq!(round_to_half_band(6.2), 6.0);
        assert_eq!(round_to_half_band(7.0), 7.0);
    }
}
