//! Fixed library of fingerprint helper functions. A helper's definition is
//! appended to a fingerprint script only when its name occurs in the script
//! text; see [`crate::Dialect::mangle_fingerprints`].

/// (name, definition) pairs available to bash fingerprint scripts.
/// PowerShell currently has no helper library.
pub const BASH_FINGERPRINT_SNIPPETS: &[(&str, &str)] = &[
    (
        "rig-libc-version",
        r#"
rig-libc-version()
{
    if ! type -p ${1:-${CC:-cc}} >/dev/null ; then
        echo "No C compiler!" >&2
        return 1
    fi

    # Machine type matters (e.g. x86_64):
    uname -m

    # Try glibc first
    cat >conftest.c <<EOF
#include <stdio.h>
#include <gnu/libc-version.h>
int main(){ printf("glibc %s\n", gnu_get_libc_version()); return 0; }
EOF
    if ${1:-${CC:-cc}} -o conftest conftest.c >/dev/null ; then
        ./conftest && return 0
    fi

    # Maybe musl? Link a trivial program and extract the runtime loader; on
    # musl the loader is executable and prints its version.
    cat >conftest.c <<EOF
int main(){ return 0; }
EOF
    if ! ${1:-${CC:-cc}} -o conftest conftest.c >/dev/null ; then
        echo "The C compiler does not seem to work" >&2
        return 1
    fi

    DL=$(readelf -p .interp ./conftest | sed -n -e '/ld-musl/s/[^/]*\(\/.*\)/\1/p')
    if [[ -x $DL ]] ; then
        $DL 2>&1 || true
        return 0
    fi

    echo "Unsupported libc" >&2
    return 1
}
"#,
    ),
    (
        "rig-libstdc++-version",
        r#"
rig-libstdc++-version()
{
    if ! type -p ${1:-${CXX:-c++}} >/dev/null ; then
        echo "No C++ compiler!" >&2
        return 1
    fi

    # Machine type matters (e.g. x86_64):
    uname -m

    cat >conftest.cpp <<EOF
#include <iostream>
int main(int /*argc*/, char ** /*argv*/)
{
    int ret = 1;
#ifdef __GLIBCXX__
    std::cout << "libstdc++ " << __GLIBCXX__ << &std::endl;
    ret = 0;
#endif
#ifdef _LIBCPP_VERSION
    std::cout << "libc++ " << _LIBCPP_VERSION << &std::endl;
    ret = 0;
#endif
    return ret;
}
EOF
    ${1:-${CXX:-c++}} -o conftest conftest.cpp >/dev/null
    ./conftest
}
"#,
    ),
    (
        "rig-hash-libraries",
        r#"
rig-hash-libraries()
{
    declare -a opts=( -o canary -xc - )
    local i

    for i in "$@" ; do
        opts+=( -l "$i" )
    done

    echo "int main(){return 0;}" | ${CC:-cc} "${opts[@]}"
    sha1sum $(ldd canary | grep -o -e '/[^[:space:]]*' | sort -u)
}
"#,
    ),
];
