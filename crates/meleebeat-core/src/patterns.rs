//! Musical material: block content and intensity-indexed progressions.
//!
//! Blocks are drawn from a finite, pre-generated sequence that wraps, so a
//! seed reproduces a round's blocks exactly. Progressions come from a
//! small fixed table indexed by [`IntensityLevel`]; chords rotate one per
//! bar and melody cells are re-selected at random each time the
//! progression wraps.

use crate::music::{Chord, ChordQuality, Pitch, PitchClass, TimbreClass};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Visual tags for blocks. Index `i` sounds pitch class `i` (C, C#, ...).
pub const BLOCK_COLORS: [u32; 12] = [
    0xff0000, 0xff7f00, 0xffff00, 0x7fff00, 0x00ff00, 0x00ff7f, 0x00ffff, 0x007fff, 0x0000ff,
    0x4b0082, 0x8a2be2, 0x8b00ff,
];

/// Allowed block edge lengths. Bigger blocks sound lower.
pub const BLOCK_SIZES: [f32; 4] = [1.0, 2.0, 3.0, 4.0];

/// Octave a block of the given size sounds in.
pub fn octave_for_size(size: f32) -> Option<i8> {
    BLOCK_SIZES
        .iter()
        .position(|s| *s == size)
        .map(|i| 5 - i as i8)
}

/// Content record for one block. Immutable once generated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockConfig {
    pub pitch: Pitch,
    pub color: u32,
    pub timbre: TimbreClass,
    pub size: f32,
}

impl BlockConfig {
    /// Build the block for colour index `color_index` (0-11) and a size
    /// from [`BLOCK_SIZES`].
    pub fn new(color_index: usize, size: f32) -> Option<Self> {
        let color = *BLOCK_COLORS.get(color_index)?;
        let octave = octave_for_size(size)?;
        Some(Self {
            pitch: Pitch::new(PitchClass::ALL[color_index], octave),
            color,
            timbre: TimbreClass::Membrane,
            size,
        })
    }

    pub fn pitch_class(&self) -> PitchClass {
        self.pitch.class
    }

    pub fn octave(&self) -> i8 {
        self.pitch.octave
    }
}

/// Build the RNG for a round; `None` seeds from the OS.
pub fn round_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Finite cyclic sequence of block configs with an advancing cursor.
#[derive(Clone, Debug)]
pub struct BlockSequence {
    configs: Vec<BlockConfig>,
    cursor: usize,
}

impl BlockSequence {
    /// Generate `len` random blocks (at least one).
    pub fn generate(len: usize, rng: &mut impl Rng) -> Self {
        let configs = (0..len.max(1))
            .filter_map(|_| {
                let color_index = rng.random_range(0..BLOCK_COLORS.len());
                let size = BLOCK_SIZES[rng.random_range(0..BLOCK_SIZES.len())];
                BlockConfig::new(color_index, size)
            })
            .collect();
        Self { configs, cursor: 0 }
    }

    pub fn from_seed(len: usize, seed: u64) -> Self {
        Self::generate(len, &mut StdRng::seed_from_u64(seed))
    }

    /// Draw the next block, wrapping to the start after the last one.
    pub fn next_block_config(&mut self) -> BlockConfig {
        let config = self.configs[self.cursor];
        self.cursor = (self.cursor + 1) % self.configs.len();
        config
    }

    /// Index of the block the next draw returns.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn as_slice(&self) -> &[BlockConfig] {
        &self.configs
    }
}

/// How busy the backing track is. Chosen from round progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntensityLevel {
    Calm,
    Building,
    Peak,
}

impl IntensityLevel {
    pub const ALL: [IntensityLevel; 3] = [
        IntensityLevel::Calm,
        IntensityLevel::Building,
        IntensityLevel::Peak,
    ];

    /// Map round progress in `[0, 1]` to a level.
    ///
    /// Buckets are half-open: `[0, t0)`, `[t0, t1)`, `[t1, ..]`.
    pub fn from_progress(progress: f64, thresholds: [f64; 2]) -> Self {
        if progress < thresholds[0] {
            IntensityLevel::Calm
        } else if progress < thresholds[1] {
            IntensityLevel::Building
        } else {
            IntensityLevel::Peak
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One note inside a bar, relative to the bar's downbeat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    pub offset_beats: f64,
    pub pitch: Pitch,
    pub duration_beats: f64,
    pub velocity: f32,
}

/// A bass step relative to the current chord root.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BassStep {
    pub offset_beats: f64,
    pub semitones: i32,
    pub duration_beats: f64,
}

/// A short melodic figure spanning one bar.
#[derive(Clone, Debug, PartialEq)]
pub struct MelodyCell {
    pub notes: Vec<NoteEvent>,
}

/// One table entry: chords plus the bass, melody and percussion that go
/// with them.
#[derive(Clone, Debug, PartialEq)]
pub struct Progression {
    pub chords: Vec<Chord>,
    pub bass: Vec<BassStep>,
    pub bass_octave: i8,
    pub melody: Vec<MelodyCell>,
    pub percussion: Vec<NoteEvent>,
}

impl Progression {
    /// Bass notes for one bar over `chord`.
    pub fn bass_for(&self, chord: &Chord) -> impl Iterator<Item = NoteEvent> + '_ {
        let root = Pitch::new(chord.root.class, self.bass_octave);
        self.bass.iter().map(move |step| NoteEvent {
            offset_beats: step.offset_beats,
            pitch: root.transpose(step.semitones),
            duration_beats: step.duration_beats,
            velocity: 0.8,
        })
    }
}

/// Material for one bar.
#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    pub level: IntensityLevel,
    pub chord: Chord,
    pub bass: Vec<NoteEvent>,
    pub melody: Vec<NoteEvent>,
    pub percussion: Vec<NoteEvent>,
}

fn p(class: PitchClass, octave: i8) -> Pitch {
    Pitch::new(class, octave)
}

fn n(offset_beats: f64, pitch: Pitch, duration_beats: f64) -> NoteEvent {
    NoteEvent {
        offset_beats,
        pitch,
        duration_beats,
        velocity: 0.7,
    }
}

fn cell(notes: &[(f64, PitchClass, f64)]) -> MelodyCell {
    MelodyCell {
        notes: notes
            .iter()
            .map(|(offset, class, duration)| n(*offset, p(*class, 5), *duration))
            .collect(),
    }
}

fn kick(offset_beats: f64, velocity: f32) -> NoteEvent {
    NoteEvent {
        offset_beats,
        pitch: p(PitchClass::C, 2),
        duration_beats: 0.25,
        velocity,
    }
}

fn default_table() -> [Progression; 3] {
    use ChordQuality::*;
    use PitchClass::*;

    let calm = Progression {
        chords: vec![
            Chord::new(p(C, 4), Major7),
            Chord::new(p(D, 4), Dominant7),
            Chord::new(p(E, 4), Major7),
            Chord::new(p(Fs, 4), Minor7),
        ],
        bass: vec![
            BassStep { offset_beats: 0.0, semitones: 0, duration_beats: 2.0 },
            BassStep { offset_beats: 2.0, semitones: 7, duration_beats: 2.0 },
        ],
        bass_octave: 2,
        melody: vec![
            cell(&[(0.0, E, 2.0), (2.0, G, 2.0)]),
            cell(&[(0.0, B, 1.0), (1.0, A, 1.0), (2.0, Fs, 2.0)]),
            cell(&[(1.0, D, 1.0), (3.0, E, 1.0)]),
        ],
        percussion: vec![kick(0.0, 0.5)],
    };

    let building = Progression {
        chords: vec![
            Chord::new(p(C, 4), Major7),
            Chord::new(p(A, 3), Minor7),
            Chord::new(p(D, 4), Dominant7),
            Chord::new(p(G, 3), Major7),
        ],
        bass: vec![
            BassStep { offset_beats: 0.0, semitones: 0, duration_beats: 1.0 },
            BassStep { offset_beats: 1.0, semitones: 0, duration_beats: 1.0 },
            BassStep { offset_beats: 2.0, semitones: 7, duration_beats: 1.0 },
            BassStep { offset_beats: 3.0, semitones: 12, duration_beats: 1.0 },
        ],
        bass_octave: 2,
        melody: vec![
            cell(&[(0.0, C, 0.5), (0.5, D, 0.5), (1.0, E, 1.0), (2.0, Fs, 1.0), (3.0, G, 1.0)]),
            cell(&[(0.0, A, 1.0), (1.5, G, 0.5), (2.0, E, 2.0)]),
            cell(&[(0.5, B, 0.5), (1.0, A, 0.5), (1.5, Fs, 0.5), (2.0, D, 2.0)]),
        ],
        percussion: vec![kick(0.0, 0.7), kick(2.0, 0.6)],
    };

    let peak = Progression {
        chords: vec![
            Chord::new(p(D, 4), Dominant7),
            Chord::new(p(G, 3), Major7),
            Chord::new(p(C, 4), Major7),
            Chord::new(p(B, 3), Minor7),
        ],
        bass: (0..8)
            .map(|i| BassStep {
                offset_beats: i as f64 * 0.5,
                semitones: if i % 4 == 3 { 7 } else { 0 },
                duration_beats: 0.5,
            })
            .collect(),
        bass_octave: 2,
        melody: vec![
            cell(&[(0.0, Fs, 0.5), (0.5, G, 0.5), (1.0, A, 0.5), (1.5, B, 0.5), (2.0, D, 1.0), (3.0, C, 1.0)]),
            cell(&[(0.0, E, 0.5), (0.5, Fs, 0.5), (1.0, E, 0.5), (1.5, D, 0.5), (2.0, B, 2.0)]),
            cell(&[(0.0, G, 0.25), (0.25, A, 0.25), (0.5, B, 0.5), (1.0, D, 1.0), (2.5, Fs, 1.5)]),
        ],
        percussion: vec![kick(0.0, 0.9), kick(1.0, 0.6), kick(2.0, 0.8), kick(2.5, 0.5), kick(3.0, 0.6)],
    };

    [calm, building, peak]
}

/// Intensity-indexed progressions with rotation and random melody choice.
pub struct PatternLibrary {
    table: [Progression; 3],
    rng: StdRng,
    chord_cursor: usize,
    melody_index: usize,
    level: IntensityLevel,
}

impl PatternLibrary {
    pub fn new(rng: StdRng) -> Self {
        Self {
            table: default_table(),
            rng,
            chord_cursor: 0,
            melody_index: 0,
            level: IntensityLevel::Calm,
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// The table entry for a level.
    pub fn progression_for(&self, level: IntensityLevel) -> &Progression {
        &self.table[level.index()]
    }

    pub fn level(&self) -> IntensityLevel {
        self.level
    }

    /// Material for the next bar at `level`.
    ///
    /// Chords rotate one per bar. A level change restarts the rotation.
    /// Whenever the rotation wraps, a new melody cell is picked at random.
    pub fn next_bar(&mut self, level: IntensityLevel) -> Bar {
        if level != self.level {
            log::debug!("[PATTERNS] Intensity {:?} -> {:?}", self.level, level);
            self.level = level;
            self.chord_cursor = 0;
            self.melody_index = 0;
        }

        let progression = &self.table[level.index()];
        if self.chord_cursor >= progression.chords.len() {
            self.chord_cursor = 0;
            self.melody_index = self.rng.random_range(0..progression.melody.len());
        }
        let chord = progression.chords[self.chord_cursor];
        self.chord_cursor += 1;

        Bar {
            level,
            chord,
            bass: progression.bass_for(&chord).collect(),
            melody: progression.melody[self.melody_index].notes.clone(),
            percussion: progression.percussion.clone(),
        }
    }

    /// Restart rotation, e.g. for a new round.
    pub fn reset(&mut self) {
        self.chord_cursor = 0;
        self.melody_index = 0;
        self.level = IntensityLevel::Calm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::Scale;

    #[test]
    fn test_block_mapping() {
        let block = BlockConfig::new(6, 2.0).unwrap();
        assert_eq!(block.pitch_class(), PitchClass::Fs);
        assert_eq!(block.octave(), 4);
        assert_eq!(block.color, 0x00ffff);
        assert_eq!(block.timbre, TimbreClass::Membrane);

        assert_eq!(octave_for_size(1.0), Some(5));
        assert_eq!(octave_for_size(4.0), Some(2));
        assert_eq!(octave_for_size(2.5), None);
        assert!(BlockConfig::new(12, 1.0).is_none());
    }

    #[test]
    fn test_sequence_is_cyclic_and_seeded() {
        let mut a = BlockSequence::from_seed(150, 7);
        let b = BlockSequence::from_seed(150, 7);
        assert_eq!(a.len(), 150);
        assert_eq!(a.as_slice(), b.as_slice());

        let first: Vec<_> = (0..150).map(|_| a.next_block_config()).collect();
        let second: Vec<_> = (0..150).map(|_| a.next_block_config()).collect();
        assert_eq!(first, second);
        assert_eq!(first.as_slice(), b.as_slice());
        assert_eq!(a.cursor(), 0);
    }

    #[test]
    fn test_empty_sequence_request_yields_one_block() {
        let mut seq = BlockSequence::from_seed(0, 1);
        assert_eq!(seq.len(), 1);
        let block = seq.next_block_config();
        assert_eq!(seq.next_block_config(), block);
    }

    #[test]
    fn test_intensity_boundaries_half_open() {
        let t = [0.3, 0.7];
        assert_eq!(IntensityLevel::from_progress(0.0, t), IntensityLevel::Calm);
        assert_eq!(IntensityLevel::from_progress(0.2999, t), IntensityLevel::Calm);
        assert_eq!(IntensityLevel::from_progress(0.3, t), IntensityLevel::Building);
        assert_eq!(IntensityLevel::from_progress(0.6999, t), IntensityLevel::Building);
        assert_eq!(IntensityLevel::from_progress(0.7, t), IntensityLevel::Peak);
        assert_eq!(IntensityLevel::from_progress(1.0, t), IntensityLevel::Peak);
    }

    #[test]
    fn test_calm_progression_rotates_one_chord_per_bar() {
        let mut library = PatternLibrary::from_seed(3);
        let names: Vec<String> = (0..5)
            .map(|_| library.next_bar(IntensityLevel::Calm).chord.to_string())
            .collect();
        assert_eq!(names, ["CM7", "D7", "EM7", "F#m7", "CM7"]);
    }

    #[test]
    fn test_level_change_restarts_rotation() {
        let mut library = PatternLibrary::from_seed(3);
        library.next_bar(IntensityLevel::Calm);
        library.next_bar(IntensityLevel::Calm);
        let bar = library.next_bar(IntensityLevel::Peak);
        assert_eq!(bar.chord, library.progression_for(IntensityLevel::Peak).chords[0]);
        assert_eq!(bar.bass.len(), 8);
        assert_eq!(library.level(), IntensityLevel::Peak);
    }

    #[test]
    fn test_material_fits_within_bar() {
        let library = PatternLibrary::from_seed(1);
        for level in IntensityLevel::ALL {
            let progression = library.progression_for(level);
            assert!(!progression.chords.is_empty());
            assert!(!progression.melody.is_empty());
            let notes = progression
                .melody
                .iter()
                .flat_map(|c| c.notes.iter())
                .chain(progression.percussion.iter());
            for note in notes {
                assert!(note.offset_beats >= 0.0 && note.offset_beats < 4.0);
                assert!(note.offset_beats + note.duration_beats <= 4.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_melodies_stay_in_lydian() {
        let scale = Scale::c_lydian();
        let library = PatternLibrary::from_seed(1);
        for level in IntensityLevel::ALL {
            for cell in &library.progression_for(level).melody {
                assert!(cell.notes.iter().all(|n| scale.contains(n.pitch.class)));
            }
        }
    }
}
