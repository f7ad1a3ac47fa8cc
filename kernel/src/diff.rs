// Line Differ
//
// Minimal line-level edit scripts. Myers (linear-space divide and conquer)
// fixes the cost, a banded search then picks the script with the fewest hunks.
// Lines are opaque comparison units, terminators included.

use std::ops::{Index, IndexMut, Range};

/// Replace `old[a1..a2]` with `new[b1..b2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub a1: usize,
    pub a2: usize,
    pub b1: usize,
    pub b2: usize,
}

impl Hunk {
    pub fn deleted(&self) -> usize {
        self.a2 - self.a1
    }

    pub fn inserted(&self) -> usize {
        self.b2 - self.b1
    }
}

/// Band cells above which the exact hunk search gives way to compaction.
const MAX_BAND_CELLS: usize = 1 << 22;

/// Compute the hunks turning `old` into `new`, in ascending order.
///
/// The script is minimal, and among minimal scripts it has the fewest
/// hunks, so unchanged runs stay contiguous and keep their attribution.
/// Hunks never touch each other: at least one kept line separates any two.
pub fn diff_lines<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Hunk> {
    let prefix = common_prefix_len(old, 0..old.len(), new, 0..new.len());
    let suffix = common_suffix_len(old, prefix..old.len(), new, prefix..new.len());
    let old_range = prefix..old.len() - suffix;
    let new_range = prefix..new.len() - suffix;

    if old_range.is_empty() || new_range.is_empty() {
        let mut hunks = Hunks::default();
        hunks.change(old_range, new_range);
        return hunks.0;
    }

    let script = myers(old, old_range.clone(), new, new_range.clone());
    let cost = script.iter().map(|h| h.deleted() + h.inserted()).sum();
    fewest_hunks(old, old_range, new, new_range, cost).unwrap_or_else(|| compact_hunks(old, new, &script))
}

fn myers<T: PartialEq>(old: &[T], old_range: Range<usize>, new: &[T], new_range: Range<usize>) -> Vec<Hunk> {
    let mut hunks = Hunks::default();
    let max_d = max_d(old_range.len(), new_range.len());
    let mut vf = V::new(max_d);
    let mut vb = V::new(max_d);
    conquer(old, old_range, new, new_range, &mut vf, &mut vb, &mut hunks);
    hunks.0
}

#[derive(Default)]
struct Hunks(Vec<Hunk>);

impl Hunks {
    fn change(&mut self, a: Range<usize>, b: Range<usize>) {
        if a.is_empty() && b.is_empty() {
            return;
        }
        if let Some(last) = self.0.last_mut() {
            if last.a2 == a.start && last.b2 == b.start {
                last.a2 = a.end;
                last.b2 = b.end;
                return;
            }
        }
        self.0.push(Hunk {
            a1: a.start,
            a2: a.end,
            b1: b.start,
            b2: b.end,
        });
    }
}

/// Furthest-reaching x per diagonal `k`, indexed by signed `k`.
struct V {
    offset: isize,
    v: Vec<usize>,
}

impl V {
    fn new(max_d: usize) -> Self {
        Self {
            offset: max_d as isize,
            v: vec![0; 2 * max_d],
        }
    }
}

impl Index<isize> for V {
    type Output = usize;

    fn index(&self, k: isize) -> &usize {
        &self.v[(k + self.offset) as usize]
    }
}

impl IndexMut<isize> for V {
    fn index_mut(&mut self, k: isize) -> &mut usize {
        &mut self.v[(k + self.offset) as usize]
    }
}

fn max_d(len1: usize, len2: usize) -> usize {
    (len1 + len2 + 1) / 2 + 1
}

fn common_prefix_len<T: PartialEq>(old: &[T], old_range: Range<usize>, new: &[T], new_range: Range<usize>) -> usize {
    old[old_range]
        .iter()
        .zip(&new[new_range])
        .take_while(|(a, b)| a == b)
        .count()
}

fn common_suffix_len<T: PartialEq>(old: &[T], old_range: Range<usize>, new: &[T], new_range: Range<usize>) -> usize {
    old[old_range]
        .iter()
        .rev()
        .zip(new[new_range].iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
}

/// Find the start of the middle snake of an optimal path through the
/// edit graph of `old_range` x `new_range`.
fn find_middle_snake<T: PartialEq>(
    old: &[T],
    old_range: Range<usize>,
    new: &[T],
    new_range: Range<usize>,
    vf: &mut V,
    vb: &mut V,
) -> Option<(usize, usize)> {
    let n = old_range.len();
    let m = new_range.len();

    // The optimal path length has the parity of `delta`.
    let delta = n as isize - m as isize;
    let odd = delta & 1 == 1;

    vf[1] = 0;
    vb[1] = 0;

    let d_max = max_d(n, m);
    for d in 0..d_max as isize {
        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && vf[k - 1] < vf[k + 1]) {
                vf[k + 1]
            } else {
                vf[k - 1] + 1
            };
            let y = (x as isize - k) as usize;

            let (x0, y0) = (x, y);
            if x < n && y < m {
                x += common_prefix_len(
                    old,
                    old_range.start + x..old_range.end,
                    new,
                    new_range.start + y..new_range.end,
                );
            }
            vf[k] = x;

            if odd && (k - delta).abs() <= d - 1 && vf[k] + vb[-(k - delta)] >= n {
                return Some((x0 + old_range.start, y0 + new_range.start));
            }
        }

        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && vb[k - 1] < vb[k + 1]) {
                vb[k + 1]
            } else {
                vb[k - 1] + 1
            };
            let mut y = (x as isize - k) as usize;

            if x < n && y < m {
                let advance = common_suffix_len(
                    old,
                    old_range.start..old_range.start + n - x,
                    new,
                    new_range.start..new_range.start + m - y,
                );
                x += advance;
                y += advance;
            }
            vb[k] = x;

            if !odd && (k - delta).abs() <= d && vb[k] + vf[-(k - delta)] >= n {
                return Some((n - x + old_range.start, m - y + new_range.start));
            }
        }
    }

    None
}

fn conquer<T: PartialEq>(
    old: &[T],
    mut old_range: Range<usize>,
    new: &[T],
    mut new_range: Range<usize>,
    vf: &mut V,
    vb: &mut V,
    hunks: &mut Hunks,
) {
    let prefix = common_prefix_len(old, old_range.clone(), new, new_range.clone());
    old_range.start += prefix;
    new_range.start += prefix;

    let suffix = common_suffix_len(old, old_range.clone(), new, new_range.clone());
    old_range.end -= suffix;
    new_range.end -= suffix;

    if old_range.is_empty() || new_range.is_empty() {
        hunks.change(old_range, new_range);
    } else if let Some((x, y)) = find_middle_snake(
        old,
        old_range.clone(),
        new,
        new_range.clone(),
        vf,
        vb,
    ) {
        conquer(old, old_range.start..x, new, new_range.start..y, vf, vb, hunks);
        conquer(old, x..old_range.end, new, y..new_range.end, vf, vb, hunks);
    } else {
        hunks.change(old_range, new_range);
    }
}

/// Cost-to-go of an edit graph cell: edited lines first, then hunks opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    cost: usize,
    hunks: usize,
}

impl Score {
    fn edit(self) -> Self {
        Self {
            cost: self.cost + 1,
            ..self
        }
    }

    fn open(self) -> Self {
        Self {
            hunks: self.hunks + 1,
            ..self
        }
    }
}

const KEEP: u8 = 0;
const DELETE: u8 = 1;
const INSERT: u8 = 2;

/// First option with the lowest score.
fn pick(options: [(u8, Option<Score>); 3]) -> (u8, Option<Score>) {
    let mut best = (KEEP, None);
    for (step, score) in options {
        if let Some(score) = score {
            if best.1.map_or(true, |b| score < b) {
                best = (step, Some(score));
            }
        }
    }
    best
}

/// Exact search for the script of cost `cost` with the fewest hunks.
///
/// A path of cost `cost` never leaves the diagonals `lo..=hi`, so only that
/// band is scored, backwards from the end. Each cell keeps two scores: one
/// for arriving on a kept line and one for arriving inside a hunk. Returns
/// `None` when the band is too large.
fn fewest_hunks<T: PartialEq>(
    old: &[T],
    old_range: Range<usize>,
    new: &[T],
    new_range: Range<usize>,
    cost: usize,
) -> Option<Vec<Hunk>> {
    let a = &old[old_range.clone()];
    let b = &new[new_range.clone()];
    let (n, m) = (a.len(), b.len());

    let delta = n as isize - m as isize;
    let slack = (cost as isize - delta.abs()) / 2;
    let lo = delta.min(0) - slack;
    let hi = delta.max(0) + slack;
    let width = (hi - lo + 1) as usize;
    if (n + 1).checked_mul(width)? > MAX_BAND_CELLS {
        return None;
    }

    // Low two bits: step taken outside a hunk. Next two: inside a hunk.
    let mut steps = vec![0u8; (n + 1) * width];
    let mut below_kept: Vec<Option<Score>> = vec![None; width];
    let mut below_open: Vec<Option<Score>> = vec![None; width];

    for x in (0..=n).rev() {
        let mut kept: Vec<Option<Score>> = vec![None; width];
        let mut open: Vec<Option<Score>> = vec![None; width];
        for i in 0..width {
            let y = x as isize - (lo + i as isize);
            if y < 0 || y > m as isize {
                continue;
            }
            let y = y as usize;
            if x == n && y == m {
                kept[i] = Some(Score::default());
                open[i] = Some(Score::default());
                continue;
            }

            let keep = if x < n && y < m && a[x] == b[y] {
                below_kept[i]
            } else {
                None
            };
            let delete = if x < n && i + 1 < width {
                below_open[i + 1].map(Score::edit)
            } else {
                None
            };
            let insert = if y < m && i > 0 {
                open[i - 1].map(Score::edit)
            } else {
                None
            };

            let (inside, inside_score) = pick([(KEEP, keep), (DELETE, delete), (INSERT, insert)]);
            let (outside, outside_score) = pick([
                (KEEP, keep),
                (DELETE, delete.map(Score::open)),
                (INSERT, insert.map(Score::open)),
            ]);
            open[i] = inside_score;
            kept[i] = outside_score;
            steps[x * width + i] = outside | (inside << 2);
        }
        below_kept = kept;
        below_open = open;
    }
    below_kept[(-lo) as usize]?;

    let mut hunks = Vec::new();
    let (mut x, mut y) = (0, 0);
    let mut start: Option<(usize, usize)> = None;
    while x < n || y < m {
        let packed = steps[x * width + (x as isize - y as isize - lo) as usize];
        let step = if start.is_some() { packed >> 2 } else { packed & 3 };
        match step {
            KEEP => {
                if let Some((a1, b1)) = start.take() {
                    hunks.push(Hunk {
                        a1: old_range.start + a1,
                        a2: old_range.start + x,
                        b1: new_range.start + b1,
                        b2: new_range.start + y,
                    });
                }
                x += 1;
                y += 1;
            }
            DELETE => {
                start.get_or_insert((x, y));
                x += 1;
            }
            _ => {
                start.get_or_insert((x, y));
                y += 1;
            }
        }
    }
    if let Some((a1, b1)) = start {
        hunks.push(Hunk {
            a1: old_range.start + a1,
            a2: old_range.end,
            b1: new_range.start + b1,
            b2: new_range.end,
        });
    }
    Some(hunks)
}

/// Run of changed lines on one side, between two kept lines.
#[derive(Debug, Clone, Copy)]
struct Group {
    start: usize,
    end: usize,
}

impl Group {
    fn first(changed: &[bool]) -> Self {
        let mut group = Self { start: 0, end: 0 };
        group.extend_down(changed);
        group
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn extend_down(&mut self, changed: &[bool]) {
        while self.end < changed.len() && changed[self.end] {
            self.end += 1;
        }
    }

    fn extend_up(&mut self, changed: &[bool]) {
        while self.start > 0 && changed[self.start - 1] {
            self.start -= 1;
        }
    }

    fn next(&mut self, changed: &[bool]) -> bool {
        if self.end == changed.len() {
            return false;
        }
        self.start = self.end + 1;
        self.end = self.start;
        self.extend_down(changed);
        true
    }

    fn previous(&mut self, changed: &[bool]) -> bool {
        if self.start == 0 {
            return false;
        }
        self.end = self.start - 1;
        self.start = self.end;
        self.extend_up(changed);
        true
    }

    /// Move the group one line down across an equal line.
    fn slide_down<T: PartialEq>(&mut self, lines: &[T], changed: &mut [bool]) -> bool {
        if self.end < lines.len() && lines[self.start] == lines[self.end] {
            changed[self.start] = false;
            changed[self.end] = true;
            self.start += 1;
            self.end += 1;
            self.extend_down(changed);
            true
        } else {
            false
        }
    }

    fn slide_up<T: PartialEq>(&mut self, lines: &[T], changed: &mut [bool]) -> bool {
        if self.start > 0 && lines[self.start - 1] == lines[self.end - 1] {
            self.start -= 1;
            self.end -= 1;
            changed[self.start] = true;
            changed[self.end] = false;
            self.extend_up(changed);
            true
        } else {
            false
        }
    }
}

/// Slide each changed group of `lines` across equal neighbours, merging
/// groups that meet and lining groups up with changes on the other side.
///
/// Every slide keeps the script valid and its cost unchanged, so stopping
/// early on a desynchronized walk is harmless.
fn compact<T: PartialEq>(lines: &[T], changed: &mut [bool], other: &[bool]) {
    let mut group = Group::first(changed);
    let mut other_group = Group::first(other);

    loop {
        if !group.is_empty() {
            let mut earliest_end;
            let mut end_matching_other;
            loop {
                let size = group.end - group.start;
                end_matching_other = None;

                while group.slide_up(lines, changed) {
                    if !other_group.previous(other) {
                        return;
                    }
                }
                earliest_end = group.end;
                if !other_group.is_empty() {
                    end_matching_other = Some(group.end);
                }

                while group.slide_down(lines, changed) {
                    if !other_group.next(other) {
                        return;
                    }
                    if !other_group.is_empty() {
                        end_matching_other = Some(group.end);
                    }
                }

                if size == group.end - group.start {
                    break;
                }
            }

            if group.end != earliest_end && end_matching_other.is_some() {
                while other_group.is_empty() {
                    if !group.slide_up(lines, changed) || !other_group.previous(other) {
                        return;
                    }
                }
            }
        }

        if !group.next(changed) || !other_group.next(other) {
            break;
        }
    }
}

/// Fallback for inputs too large for [`fewest_hunks`].
fn compact_hunks<T: PartialEq>(old: &[T], new: &[T], script: &[Hunk]) -> Vec<Hunk> {
    let mut old_changed = vec![false; old.len()];
    let mut new_changed = vec![false; new.len()];
    for hunk in script {
        old_changed[hunk.a1..hunk.a2].fill(true);
        new_changed[hunk.b1..hunk.b2].fill(true);
    }

    compact(old, &mut old_changed, &new_changed);
    compact(new, &mut new_changed, &old_changed);

    let mut hunks = Vec::new();
    let (mut a, mut b) = (0, 0);
    loop {
        let (a1, b1) = (a, b);
        while a < old.len() && old_changed[a] {
            a += 1;
        }
        while b < new.len() && new_changed[b] {
            b += 1;
        }
        if a > a1 || b > b1 {
            hunks.push(Hunk { a1, a2: a, b1, b2: b });
        }
        if a >= old.len() || b >= new.len() {
            break;
        }
        a += 1;
        b += 1;
    }
    hunks
}
