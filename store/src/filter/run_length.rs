use anyhow::{bail, Result as AnyResult};

const EOD: u8 = 128;

pub fn decode(data: &[u8]) -> AnyResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(data.len());
    let mut c = 0;

    while let Some(&length) = data.get(c) {
        if length < EOD {
            // copy following length + 1 bytes literally
            let start = c + 1;
            let end = start + length as usize + 1;
            let Some(literal) = data.get(start..end) else {
                bail!("literal run exceeds data at {c}");
            };
            buf.extend_from_slice(literal);
            c = end;
        } else if length > EOD {
            let Some(&b) = data.get(c + 1) else {
                bail!("repeat run missing byte at {c}");
            };
            buf.extend(std::iter::repeat(b).take(257 - length as usize));
            c += 2;
        } else {
            break;
        }
    }

    Ok(buf)
}

/// Encode with runs of at most 128 bytes, terminated by EOD.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 128 + 2);
    let mut literal_start = 0;
    let mut i = 0;

    let flush_literal = |out: &mut Vec<u8>, literal: &[u8]| {
        for chunk in literal.chunks(128) {
            out.push((chunk.len() - 1) as u8);
            out.extend_from_slice(chunk);
        }
    };

    while i < data.len() {
        let b = data[i];
        let run = data[i..].iter().take(128).take_while(|&&x| x == b).count();
        if run >= 2 {
            flush_literal(&mut out, &data[literal_start..i]);
            out.push((257 - run) as u8);
            out.push(b);
            i += run;
            literal_start = i;
        } else {
            i += 1;
        }
    }
    flush_literal(&mut out, &data[literal_start..]);
    out.push(EOD);
    out
}
