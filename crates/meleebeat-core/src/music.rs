//! Pitch, scale, chord and level primitives.
//!
//! These are content-agnostic: instrument timbres are named by
//! [`TimbreClass`] only, the actual oscillator and envelope settings
//! live in the audio backend.

use std::fmt;
use std::str::FromStr;

/// One of the twelve chromatic pitch classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

impl PitchClass {
    /// All pitch classes in chromatic order starting on C.
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Semitones above C (0-11).
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Pitch class for a semitone count, wrapping modulo 12.
    pub fn from_index(semitones: i32) -> Self {
        Self::ALL[semitones.rem_euclid(12) as usize]
    }

    /// Transpose by a number of semitones.
    pub fn transpose(self, semitones: i32) -> Self {
        Self::from_index(self.index() as i32 + semitones)
    }

    /// Note name using sharps.
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or_else(|| "empty pitch class".to_string())?;
        let base: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(format!("unknown pitch class '{s}'")),
        };
        let offset: i32 = chars
            .map(|c| match c {
                '#' | 's' => Ok(1),
                'b' => Ok(-1),
                _ => Err(format!("unknown accidental in '{s}'")),
            })
            .sum::<Result<i32, String>>()?;
        Ok(Self::from_index(base + offset))
    }
}

/// A concrete pitch: pitch class plus octave (C4 = MIDI 60).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pitch {
    pub class: PitchClass,
    pub octave: i8,
}

impl Pitch {
    pub fn new(class: PitchClass, octave: i8) -> Self {
        Self { class, octave }
    }

    /// MIDI note number.
    pub fn midi(self) -> i32 {
        (self.octave as i32 + 1) * 12 + self.class.index() as i32
    }

    /// Equal-tempered frequency with A4 = 440 Hz.
    pub fn frequency_hz(self) -> f64 {
        440.0 * 2f64.powf((self.midi() - 69) as f64 / 12.0)
    }

    /// Transpose by a number of semitones.
    pub fn transpose(self, semitones: i32) -> Self {
        let midi = self.midi() + semitones;
        Self {
            class: PitchClass::from_index(midi),
            octave: (midi.div_euclid(12) - 1) as i8,
        }
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.octave)
    }
}

/// Diatonic modes supported for the active scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Ionian,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Aeolian,
    Locrian,
}

impl Mode {
    fn intervals(self) -> [u8; 7] {
        const MAJOR: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
        let rotation = match self {
            Mode::Ionian => 0,
            Mode::Dorian => 1,
            Mode::Phrygian => 2,
            Mode::Lydian => 3,
            Mode::Mixolydian => 4,
            Mode::Aeolian => 5,
            Mode::Locrian => 6,
        };
        let mut out = [0u8; 7];
        for (i, slot) in out.iter_mut().enumerate() {
            let step = MAJOR[(i + rotation) % 7];
            *slot = (step + 12 - MAJOR[rotation]) % 12;
        }
        out
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ionian" | "major" => Ok(Mode::Ionian),
            "dorian" => Ok(Mode::Dorian),
            "phrygian" => Ok(Mode::Phrygian),
            "lydian" => Ok(Mode::Lydian),
            "mixolydian" => Ok(Mode::Mixolydian),
            "aeolian" | "minor" => Ok(Mode::Aeolian),
            "locrian" => Ok(Mode::Locrian),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// A set of pitch classes, stored as a 12-bit mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Scale {
    mask: u16,
}

impl Scale {
    /// Build a scale from explicit pitch classes.
    pub fn from_classes(classes: impl IntoIterator<Item = PitchClass>) -> Self {
        let mask = classes
            .into_iter()
            .fold(0u16, |mask, pc| mask | (1 << pc.index()));
        Self { mask }
    }

    /// Seven-note mode on a root.
    pub fn mode(root: PitchClass, mode: Mode) -> Self {
        Self::from_classes(
            mode.intervals()
                .iter()
                .map(|step| root.transpose(*step as i32)),
        )
    }

    /// Parse `"<root> <mode>"`, e.g. `"C lydian"` or `"F# dorian"`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = text.split_whitespace();
        let root: PitchClass = parts
            .next()
            .ok_or_else(|| "empty scale".to_string())?
            .parse()?;
        let mode: Mode = parts.next().unwrap_or("ionian").parse()?;
        if parts.next().is_some() {
            return Err(format!("trailing text in scale '{text}'"));
        }
        Ok(Self::mode(root, mode))
    }

    /// C Lydian, the default active scale.
    pub fn c_lydian() -> Self {
        Self::mode(PitchClass::C, Mode::Lydian)
    }

    /// Membership test.
    #[inline]
    pub fn contains(&self, pc: PitchClass) -> bool {
        self.mask & (1 << pc.index()) != 0
    }

    pub fn len(&self) -> usize {
        self.mask.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Member pitch classes in chromatic order.
    pub fn classes(&self) -> impl Iterator<Item = PitchClass> + '_ {
        PitchClass::ALL.into_iter().filter(|pc| self.contains(*pc))
    }
}

/// Chord qualities used by the progression tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChordQuality {
    Major7,
    Dominant7,
    Minor7,
}

impl ChordQuality {
    fn intervals(self) -> &'static [i32] {
        match self {
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major7 => "M7",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Minor7 => "m7",
        }
    }
}

/// A voiced chord: root pitch plus quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chord {
    pub root: Pitch,
    pub quality: ChordQuality,
}

impl Chord {
    pub const fn new(root: Pitch, quality: ChordQuality) -> Self {
        Self { root, quality }
    }

    /// Chord tones in close position above the root.
    pub fn pitches(&self) -> impl Iterator<Item = Pitch> + '_ {
        self.quality
            .intervals()
            .iter()
            .map(move |i| self.root.transpose(*i))
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root.class, self.quality.suffix())
    }
}

/// Instrument class a voice belongs to. Each class has its own fixed pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimbreClass {
    /// Plain sine synth.
    Sine,
    /// Membrane/metallic percussion used by blocks.
    Membrane,
    /// FM synth used for melody cells.
    Fm,
    /// AM synth used for bass.
    Am,
    /// Slow-envelope pad for chords.
    Pad,
    /// Short click for metronome and ticker.
    Click,
}

impl TimbreClass {
    pub const ALL: [TimbreClass; 6] = [
        TimbreClass::Sine,
        TimbreClass::Membrane,
        TimbreClass::Fm,
        TimbreClass::Am,
        TimbreClass::Pad,
        TimbreClass::Click,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A level in decibels, clamped to `[-inf, 0]`.
///
/// `-inf` is silence and `0` is the pool ceiling.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Decibels(f64);

impl Decibels {
    pub const SILENCE: Decibels = Decibels(f64::NEG_INFINITY);
    pub const CEILING: Decibels = Decibels(0.0);

    /// Clamp a raw dB value into range. NaN maps to silence.
    pub fn new(db: f64) -> Self {
        if db.is_nan() {
            Self::SILENCE
        } else {
            Self(db.min(0.0))
        }
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_silent(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    /// Linear amplitude (0 for silence, 1 at the ceiling).
    pub fn to_gain(self) -> f64 {
        if self.is_silent() {
            0.0
        } else {
            10f64.powf(self.0 / 20.0)
        }
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::CEILING
    }
}

/// Clamp a velocity into `[0, 1]`, mapping NaN to 0.
pub fn clamp_velocity(velocity: f32) -> f32 {
    if velocity.is_nan() {
        0.0
    } else {
        velocity.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_midi_and_frequency() {
        let a4 = Pitch::new(PitchClass::A, 4);
        assert_eq!(a4.midi(), 69);
        assert!((a4.frequency_hz() - 440.0).abs() < 1e-9);
        assert_eq!(Pitch::new(PitchClass::C, 4).midi(), 60);
        assert_eq!(Pitch::new(PitchClass::B, 3).transpose(1), Pitch::new(PitchClass::C, 4));
        assert_eq!(Pitch::new(PitchClass::C, 4).to_string(), "C4");
    }

    #[test]
    fn test_pitch_class_parse() {
        assert_eq!("F#".parse::<PitchClass>().unwrap(), PitchClass::Fs);
        assert_eq!("Bb".parse::<PitchClass>().unwrap(), PitchClass::As);
        assert_eq!("c".parse::<PitchClass>().unwrap(), PitchClass::C);
        assert!("H".parse::<PitchClass>().is_err());
    }

    #[test]
    fn test_c_lydian_membership() {
        let scale = Scale::c_lydian();
        assert_eq!(scale.len(), 7);
        assert!(scale.contains(PitchClass::Fs));
        assert!(!scale.contains(PitchClass::F));
        let names: Vec<_> = scale.classes().map(|pc| pc.name()).collect();
        assert_eq!(names, vec!["C", "D", "E", "F#", "G", "A", "B"]);
    }

    #[test]
    fn test_modes_on_other_roots() {
        let d_dorian = Scale::mode(PitchClass::D, Mode::Dorian);
        assert_eq!(d_dorian, Scale::mode(PitchClass::C, Mode::Ionian));
        let a_aeolian = Scale::mode(PitchClass::A, Mode::Aeolian);
        assert_eq!(a_aeolian, Scale::mode(PitchClass::C, Mode::Ionian));
    }

    #[test]
    fn test_scale_parse() {
        assert_eq!(Scale::parse("C lydian").unwrap(), Scale::c_lydian());
        assert_eq!(Scale::parse("  a  Minor ").unwrap(), Scale::mode(PitchClass::C, Mode::Ionian));
        assert_eq!(Scale::parse("G").unwrap(), Scale::mode(PitchClass::G, Mode::Ionian));
        assert!(Scale::parse("").is_err());
        assert!(Scale::parse("C lydian extra").is_err());
        assert!(Scale::parse("C bebop").is_err());
    }

    #[test]
    fn test_chord_tones() {
        let d7 = Chord::new(Pitch::new(PitchClass::D, 4), ChordQuality::Dominant7);
        let tones: Vec<String> = d7.pitches().map(|p| p.to_string()).collect();
        assert_eq!(tones, vec!["D4", "F#4", "A4", "C5"]);
        assert_eq!(d7.to_string(), "D7");
    }

    #[test]
    fn test_decibels_clamp() {
        assert_eq!(Decibels::new(6.0).value(), 0.0);
        assert!(Decibels::new(f64::NEG_INFINITY).is_silent());
        assert!(Decibels::new(f64::NAN).is_silent());
        assert_eq!(Decibels::SILENCE.to_gain(), 0.0);
        assert!((Decibels::new(-20.0).to_gain() - 0.1).abs() < 1e-9);
        assert_eq!(clamp_velocity(1.7), 1.0);
        assert_eq!(clamp_velocity(-0.2), 0.0);
    }
}
