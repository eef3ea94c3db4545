use jverify::jvm::class_graph::{ClassData, ClassGraph};
use jverify::jvm::code::{
    decode_code, ConstantData, ConstantEntry, ConstantTable, FieldRef, MethodRef,
    RawExceptionHandler,
};
use jverify::jvm::verifier::{MethodContext, MethodVerifier, RawMethodCode, VerifierFrame};
use jverify::jvm::*;

use clap::{crate_version, Arg, ArgAction, Command};
use std::process;

fn main() -> Result<(), String> {
    env_logger::init();

    let matches = Command::new("JVM method verifier")
        .version(crate_version!())
        .about("Infer the stack and locals at every instruction of a JVM method, or explain why the method is invalid")
        .arg(
            Arg::new("class")
                .long("class")
                .value_name("CLASS_NAME")
                .default_value("Main")
                .help("Declaring class (eg. `foo/bar/Baz`)"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("METHOD_NAME")
                .default_value("method")
                .help("Method name (`<init>` for constructors)"),
        )
        .arg(
            Arg::new("descriptor")
                .long("descriptor")
                .value_name("DESCRIPTOR")
                .required(true)
                .help("Method descriptor (eg. `(I)I`)"),
        )
        .arg(
            Arg::new("static")
                .long("static")
                .action(ArgAction::SetTrue)
                .help("The method is static (it has no receiver)"),
        )
        .arg(
            Arg::new("max-stack")
                .long("max-stack")
                .value_name("SLOTS")
                .required(true)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("max-locals")
                .long("max-locals")
                .value_name("SLOTS")
                .required(true)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("constant")
                .long("constant")
                .value_name("INDEX=KIND:VALUE")
                .action(ArgAction::Append)
                .value_parser(parse_constant)
                .help("Constant pool entry (kinds: class, string, int, long, float, double, field, method, imethod)"),
        )
        .arg(
            Arg::new("handler")
                .long("handler")
                .value_name("START:END:HANDLER[:TYPE]")
                .action(ArgAction::Append)
                .value_parser(parse_handler)
                .help("Exception table entry, in byte offsets (TYPE is a class constant index)"),
        )
        .arg(
            Arg::new("line")
                .long("line")
                .value_name("PC:LINE")
                .action(ArgAction::Append)
                .value_parser(parse_line)
                .help("Line number table entry"),
        )
        .arg(
            Arg::new("type")
                .long("type")
                .value_name("CLASS:SUPERCLASS")
                .action(ArgAction::Append)
                .value_parser(parse_class)
                .help("Add a class to the type hierarchy"),
        )
        .arg(
            Arg::new("CODE")
                .help("Code array, as hexadecimal bytes")
                .required(true)
                .value_parser(parse_hex)
                .index(1),
        )
        .get_matches();

    let class_graph = ClassGraph::new();
    class_graph.insert_java_library_types();
    for class in matches.get_many::<(BinaryName, BinaryName)>("type").into_iter().flatten() {
        let (name, superclass) = class.clone();
        class_graph.add_class(ClassData::new(name, superclass, ClassAccessFlags::PUBLIC));
    }

    let mut constants = ConstantTable::new();
    for (index, entry) in matches
        .get_many::<(u16, ConstantEntry)>("constant")
        .into_iter()
        .flatten()
    {
        constants.insert(*index, entry.clone());
    }

    let mut access_flags = MethodAccessFlags::PUBLIC;
    if matches.get_flag("static") {
        access_flags |= MethodAccessFlags::STATIC;
    }
    let method = MethodContext::new(
        required::<String>(&matches, "class").and_then(BinaryName::from_string)?,
        required::<String>(&matches, "name").and_then(UnqualifiedName::from_string)?,
        required::<String>(&matches, "descriptor")
            .and_then(|desc| MethodDescriptor::parse(&desc).map_err(|err| err.to_string()))?,
        access_flags,
    );

    let code: Vec<u8> = required(&matches, "CODE")?;
    let exception_table: Vec<RawExceptionHandler> = matches
        .get_many::<RawExceptionHandler>("handler")
        .into_iter()
        .flatten()
        .copied()
        .collect();
    let line_numbers: Vec<(u16, u16)> = matches
        .get_many::<(u16, u16)>("line")
        .into_iter()
        .flatten()
        .copied()
        .collect();
    let raw = RawMethodCode {
        code: &code,
        max_stack: required(&matches, "max-stack")?,
        max_locals: required(&matches, "max-locals")?,
        exception_table: &exception_table,
        line_numbers: &line_numbers,
    };

    log::info!(
        "Verifying {}.{}{} ({} bytes)",
        method.class,
        method.name,
        method.descriptor.render(),
        code.len()
    );
    let verifier = MethodVerifier::new(&class_graph);
    let verified = match verifier.verify_bytecode(&method, raw, &constants) {
        Ok(verified) => verified,
        Err(failure) => {
            eprintln!("{}", failure);
            process::exit(1);
        }
    };

    let decoded = decode_code(&code, &constants).map_err(|err| err.to_string())?;
    for (index, (offset, instruction)) in decoded
        .offsets
        .iter()
        .zip(decoded.instructions.iter())
        .enumerate()
    {
        match verified.frame(index) {
            Some(frame) => println!(
                "{:>5}: {:<40} {}",
                offset,
                format!("{:?}", instruction),
                render_frame(frame)
            ),
            None => println!("{:>5}: {:<40} (dead code)", offset, format!("{:?}", instruction)),
        }
    }

    Ok(())
}

fn required<T: Clone + Send + Sync + 'static>(
    matches: &clap::ArgMatches,
    id: &str,
) -> Result<T, String> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| format!("Missing argument {}", id))
}

fn render_frame(frame: &VerifierFrame) -> String {
    let locals: Vec<String> = frame.locals.iter().map(|local| local.to_string()).collect();
    let stack: Vec<String> = frame
        .stack
        .iter()
        .map(|(_, _, value)| value.to_string())
        .collect();
    format!("locals=[{}] stack=[{}]", locals.join(", "), stack.join(", "))
}

fn parse_hex(src: &str) -> Result<Vec<u8>, String> {
    let mut digits = Vec::new();
    for c in src.chars().filter(|c| !c.is_whitespace()) {
        match c.to_digit(16) {
            Some(digit) => digits.push(digit as u8),
            None => return Err(format!("Invalid hex digit '{}' in '{}'", c, src)),
        }
    }
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", src));
    }
    Ok(digits.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

fn parse_number<T: std::str::FromStr>(src: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    src.parse::<T>()
        .map_err(|err| format!("Invalid number '{}': {}", src, err))
}

fn parse_line(src: &str) -> Result<(u16, u16), String> {
    let (start_pc, line) = src
        .split_once(':')
        .ok_or_else(|| format!("Expected PC:LINE, found '{}'", src))?;
    Ok((parse_number(start_pc)?, parse_number(line)?))
}

fn parse_handler(src: &str) -> Result<RawExceptionHandler, String> {
    let parts: Vec<&str> = src.split(':').collect();
    let catch_type = match parts.len() {
        3 => 0,
        4 => parse_number(parts[3])?,
        _ => return Err(format!("Expected START:END:HANDLER[:TYPE], found '{}'", src)),
    };
    Ok(RawExceptionHandler {
        start_pc: parse_number(parts[0])?,
        end_pc: parse_number(parts[1])?,
        handler_pc: parse_number(parts[2])?,
        catch_type,
    })
}

fn parse_class(src: &str) -> Result<(BinaryName, BinaryName), String> {
    let (name, superclass) = src
        .split_once(':')
        .ok_or_else(|| format!("Expected CLASS:SUPERCLASS, found '{}'", src))?;
    Ok((BinaryName::from_str(name)?, BinaryName::from_str(superclass)?))
}

/// Parse a member reference written as `owner.name:descriptor`
fn parse_member(src: &str) -> Result<(RefType<BinaryName>, UnqualifiedName, &str), String> {
    let (owner_and_name, descriptor) = src
        .split_once(':')
        .ok_or_else(|| format!("Expected OWNER.NAME:DESCRIPTOR, found '{}'", src))?;
    let (owner, name) = owner_and_name
        .rsplit_once('.')
        .ok_or_else(|| format!("Expected OWNER.NAME:DESCRIPTOR, found '{}'", src))?;
    let owner = RefType::from_class_constant(owner).map_err(|err| err.to_string())?;
    Ok((owner, UnqualifiedName::from_str(name)?, descriptor))
}

fn parse_constant(src: &str) -> Result<(u16, ConstantEntry), String> {
    let (index, constant) = src
        .split_once('=')
        .ok_or_else(|| format!("Expected INDEX=KIND:VALUE, found '{}'", src))?;
    let (kind, value) = constant
        .split_once(':')
        .ok_or_else(|| format!("Expected KIND:VALUE, found '{}'", constant))?;

    let entry = match kind {
        "class" => ConstantEntry::Class(
            RefType::from_class_constant(value).map_err(|err| err.to_string())?,
        ),
        "string" => ConstantEntry::Loadable(ConstantData::String(value.to_owned())),
        "int" => ConstantEntry::Loadable(ConstantData::Integer(parse_number(value)?)),
        "long" => ConstantEntry::Loadable(ConstantData::Long(parse_number(value)?)),
        "float" => ConstantEntry::Loadable(ConstantData::Float(parse_number(value)?)),
        "double" => ConstantEntry::Loadable(ConstantData::Double(parse_number(value)?)),
        "field" => {
            let (owner, name, descriptor) = parse_member(value)?;
            let class = match owner {
                RefType::Object(class) => class,
                _ => return Err(format!("Field owner of '{}' is not a class", value)),
            };
            ConstantEntry::Field(FieldRef {
                class,
                name,
                descriptor: FieldType::parse(descriptor).map_err(|err| err.to_string())?,
            })
        }
        "method" | "imethod" => {
            let (class, name, descriptor) = parse_member(value)?;
            ConstantEntry::Method(MethodRef {
                class,
                name,
                descriptor: MethodDescriptor::parse(descriptor).map_err(|err| err.to_string())?,
                is_interface: kind == "imethod",
            })
        }
        other => return Err(format!("Unknown constant kind '{}'", other)),
    };
    Ok((parse_number(index)?, entry))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_code() {
        assert_eq!(parse_hex("2a b7 0001 b1"), Ok(vec![0x2a, 0xb7, 0x00, 0x01, 0xb1]));
        assert_eq!(parse_hex("B1"), Ok(vec![0xb1]));
        assert!(parse_hex("b").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("a\u{e9}0").is_err());
    }

    #[test]
    fn table_entries() {
        assert_eq!(parse_line("4:12"), Ok((4, 12)));
        assert!(parse_line("4").is_err());

        let handler = parse_handler("0:5:6:3").unwrap();
        assert_eq!(
            (handler.start_pc, handler.end_pc, handler.handler_pc, handler.catch_type),
            (0, 5, 6, 3)
        );
        assert_eq!(parse_handler("0:5:6").unwrap().catch_type, 0);
        assert!(parse_handler("0:5").is_err());
    }
}
