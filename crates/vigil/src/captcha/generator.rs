//! Distorted-text SVG CAPTCHA rendering.
//!
//! Draws random characters with per-glyph jitter, rotation, and colour over
//! a light background crossed by noise curves.

use rand::Rng;

use super::{Puzzle, PuzzleSource};

/// Characters that survive distortion without being confused for one another
const ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const WIDTH: u32 = 150;
const HEIGHT: u32 = 50;

/// Renders text CAPTCHAs as SVG
#[derive(Debug, Clone)]
pub struct SvgPuzzleSource {
    /// Number of characters in the answer
    pub length: usize,
    /// Number of noise curves drawn over the text
    pub noise: usize,
}

impl SvgPuzzleSource {
    pub fn new(length: usize, noise: usize) -> Self {
        Self {
            length: length.max(1),
            noise,
        }
    }

    fn random_text(&self, rng: &mut impl Rng) -> String {
        (0..self.length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }

    fn render(&self, text: &str, rng: &mut impl Rng) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0,0,{WIDTH},{HEIGHT}">"#
        );

        svg.push_str(r##"<rect width="100%" height="100%" fill="#f2f2f2"/>"##);

        for _ in 0..self.noise {
            let (x1, y1) = (rng.random_range(0..WIDTH / 4), rng.random_range(0..HEIGHT));
            let (cx, cy) = (rng.random_range(WIDTH / 4..WIDTH * 3 / 4), rng.random_range(0..HEIGHT));
            let (x2, y2) = (rng.random_range(WIDTH * 3 / 4..WIDTH), rng.random_range(0..HEIGHT));
            svg.push_str(&format!(
                r#"<path d="M{x1} {y1} Q{cx} {cy} {x2} {y2}" stroke="{}" stroke-width="2" fill="none"/>"#,
                random_color(rng)
            ));
        }

        let char_width = WIDTH as f32 / (text.chars().count() as f32 + 1.0);
        for (i, c) in text.chars().enumerate() {
            let x = char_width * (i as f32 + 0.7);
            let y = 35 + rng.random_range(-6..6);
            let rotation = rng.random_range(-25..25);
            let size = rng.random_range(26..34);
            svg.push_str(&format!(
                r#"<text x="{x:.1}" y="{y}" font-family="monospace" font-size="{size}" font-weight="bold" fill="{}" transform="rotate({rotation} {x:.1} {y})">{c}</text>"#,
                random_color(rng)
            ));
        }

        svg.push_str("</svg>");
        svg
    }
}

impl Default for SvgPuzzleSource {
    fn default() -> Self {
        Self::new(
            vigil_common::constants::DEFAULT_CAPTCHA_LENGTH,
            vigil_common::constants::DEFAULT_CAPTCHA_NOISE,
        )
    }
}

impl PuzzleSource for SvgPuzzleSource {
    fn generate(&self) -> Puzzle {
        let mut rng = rand::rng();
        let answer = self.random_text(&mut rng);
        let svg = self.render(&answer, &mut rng);
        Puzzle { answer, svg }
    }
}

/// Mid-dark colours stay readable on the light background
fn random_color(rng: &mut impl Rng) -> String {
    format!(
        "rgb({},{},{})",
        rng.random_range(20..160),
        rng.random_range(20..160),
        rng.random_range(20..160)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_length_and_alphabet() {
        let source = SvgPuzzleSource::new(5, 3);
        let puzzle = source.generate();
        assert_eq!(puzzle.answer.len(), 5);
        assert!(puzzle.answer.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_svg_contains_each_glyph() {
        let source = SvgPuzzleSource::new(6, 4);
        let puzzle = source.generate();
        assert!(puzzle.svg.starts_with("<svg"));
        assert!(puzzle.svg.ends_with("</svg>"));
        assert_eq!(puzzle.svg.matches("<text").count(), 6);
        assert_eq!(puzzle.svg.matches("<path").count(), 4);
        for c in puzzle.answer.chars() {
            assert!(puzzle.svg.contains(&format!(">{c}</text>")));
        }
    }

    #[test]
    fn test_zero_length_is_clamped() {
        let source = SvgPuzzleSource::new(0, 0);
        assert_eq!(source.generate().answer.len(), 1);
    }
}
