#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Ascii85Error {
    #[error("invalid symbol")]
    InvalidSymbol,
    #[error("tail error")]
    TailError,
}

pub fn decode(data: &[u8]) -> Result<Vec<u8>, Ascii85Error> {
    let mut out = Vec::with_capacity((data.len() + 4) / 5 * 4);

    let data = data.strip_prefix(b"<~").unwrap_or(data);
    let mut stream = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace());

    let mut symbols = stream.by_ref().take_while(|&b| b != b'~');

    let (tail_len, tail) = loop {
        match symbols.next() {
            Some(b'z') => out.extend_from_slice(&[0; 4]),
            Some(a) => {
                let (b, c, d, e) = match (
                    symbols.next(),
                    symbols.next(),
                    symbols.next(),
                    symbols.next(),
                ) {
                    (Some(b), Some(c), Some(d), Some(e)) => (b, c, d, e),
                    (None, _, _, _) => break (1, [a, b'u', b'u', b'u', b'u']),
                    (Some(b), None, _, _) => break (2, [a, b, b'u', b'u', b'u']),
                    (Some(b), Some(c), None, _) => break (3, [a, b, c, b'u', b'u']),
                    (Some(b), Some(c), Some(d), None) => break (4, [a, b, c, d, b'u']),
                };
                out.extend_from_slice(&word_85([a, b, c, d, e])?);
            }
            None => break (0, [b'u'; 5]),
        }
    };

    match tail_len {
        0 => {}
        // single trailing symbol encodes nothing
        1 => return Err(Ascii85Error::TailError),
        _ => {
            let last = word_85(tail)?;
            out.extend_from_slice(&last[..tail_len - 1]);
        }
    }

    // `~` consumed by take_while, `>` ends the data; missing end marker tolerated
    match stream.next() {
        Some(b'>') | None => Ok(out),
        _ => Err(Ascii85Error::TailError),
    }
}

fn sym_85(byte: u8) -> Result<u64, Ascii85Error> {
    match byte {
        b @ 0x21..=0x75 => Ok(u64::from(b - 0x21)),
        _ => Err(Ascii85Error::InvalidSymbol),
    }
}

fn word_85(group: [u8; 5]) -> Result<[u8; 4], Ascii85Error> {
    let mut q = 0u64;
    for b in group {
        q = q * 85 + sym_85(b)?;
    }
    u32::try_from(q)
        .map(u32::to_be_bytes)
        .map_err(|_| Ascii85Error::TailError)
}

pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 * 5 + 7);
    for chunk in data.chunks(4) {
        if chunk == [0u8; 4] {
            out.push(b'z');
            continue;
        }

        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let mut q = u32::from_be_bytes(word);
        let mut group = [0u8; 5];
        for s in group.iter_mut().rev() {
            *s = (q % 85) as u8 + 0x21;
            q /= 85;
        }
        out.extend_from_slice(&group[..chunk.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}
