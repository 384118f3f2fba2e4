//! Scrolling window renderer.
//!
//! A title longer than the requested width is shown as a marquee over the
//! virtual stream `title + delimiter + title`:
//!
//! ```text
//!   width 5 (4 visible + terminator), title "song.mp3", delimiter " | "
//!
//!   interior   song  ong.  ng.m  g.mp  .mp3
//!   tail       mp3_  p3_|  3_|_
//!   delimiter  _|_s  |_so  _son  song
//! ```
//!
//! After the last delimiter frame the cursor wraps to 0 and the cycle
//! restarts with the interior phase. The head frame (`song`) thus closes one
//! cycle and opens the next, so it is served twice in a row.

pub const DEFAULT_DELIMITER: &str = " | ";

/// Position of the next window.
///
/// `offset` walks the virtual stream, `wrap` counts the frames emitted since
/// the title's tail first became visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollCursor {
    pub offset: usize,
    pub wrap: usize,
}

impl ScrollCursor {
    pub const START: ScrollCursor = ScrollCursor { offset: 0, wrap: 0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The whole title fits; nothing scrolls.
    Fits,
    Interior,
    /// Tail of the title, then delimiter, then head.
    Tail,
    /// Rest of the delimiter, then head.
    Delimiter,
}

/// Exactly `width` characters, NUL padded. The last slot is always NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    chars: Vec<char>,
}

impl Window {
    fn padded(mut chars: Vec<char>, width: usize) -> Self {
        chars.resize(width, '\0');
        Self { chars }
    }

    pub fn from_chars(chars: Vec<char>) -> Self {
        Self { chars }
    }

    /// All slots, padding included.
    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn width(&self) -> usize {
        self.chars.len()
    }

    /// The visible text, up to the first NUL.
    pub fn text(&self) -> String {
        self.chars.iter().take_while(|&&c| c != '\0').collect()
    }
}

/// Render the window at `cursor` and return it with the cursor for the next
/// request.
///
/// `width` counts slots including the terminator, so `width - 1` characters
/// are visible. `width` must be at least 1; callers reject 0 beforehand.
pub fn render(
    title: &[char],
    delimiter: &[char],
    cursor: ScrollCursor,
    width: usize,
) -> (Window, ScrollCursor, Phase) {
    debug_assert!(width >= 1);
    let len = title.len();
    let visible = width.saturating_sub(1);

    if len < width {
        return (Window::padded(title.to_vec(), width), cursor, Phase::Fits);
    }

    // Only reachable by handing in a cursor from another title.
    let cursor = if cursor.offset > len + delimiter.len() {
        ScrollCursor::START
    } else {
        cursor
    };

    let last_interior = len - visible;
    if cursor.offset <= last_interior {
        let chars = title[cursor.offset..cursor.offset + visible].to_vec();
        let next = ScrollCursor {
            offset: cursor.offset + 1,
            wrap: 0,
        };
        return (Window::padded(chars, width), next, Phase::Interior);
    }

    let mut chars = Vec::with_capacity(width);
    let phase = if cursor.offset < len {
        chars.extend_from_slice(&title[cursor.offset..]);
        fill(&mut chars, delimiter, visible);
        Phase::Tail
    } else {
        let from = (cursor.offset - len).min(delimiter.len());
        fill(&mut chars, &delimiter[from..], visible);
        Phase::Delimiter
    };
    fill(&mut chars, title, visible);

    let wrap = cursor.wrap + 1;
    let next = if wrap >= visible + delimiter.len() {
        ScrollCursor::START
    } else {
        ScrollCursor {
            offset: cursor.offset + 1,
            wrap,
        }
    };
    (Window::padded(chars, width), next, phase)
}

fn fill(buf: &mut Vec<char>, src: &[char], limit: usize) {
    let room = limit.saturating_sub(buf.len());
    buf.extend(src.iter().take(room));
}
